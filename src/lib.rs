mod client;
mod invoke;
mod network;
mod protocol;
mod service;

pub use client::ClientConnection;
pub use client::ConnectionState;
pub use client::HighwayClient;
pub use client::PendingRequestTable;
pub use client::ResponseCallback;
pub use client::{ConnectionPool, PendingRequest};
pub use invoke::{
    InvokeFuture, Invoker, OperationHandler, OperationRegistry, RequestTask, ServerInvoke,
};
pub use network::{Connection, Frame, FRAME_MAGIC};
pub use protocol::{
    CodecRegistry, LoginRequest, LoginResponse, MsgType, PayloadCodec, RawCodec, RequestHeader,
    ResponseHeader, RoutingInfo,
};
pub use service::{
    global_config, setup_local_tracing, setup_tracing, AppError, AppResult, ClientConfig,
    HighwayConfig, HighwayHost, InvokeWorkerPool, LogGuard, NetworkConfig, Server, Shutdown,
    GLOBAL_CONFIG,
};
