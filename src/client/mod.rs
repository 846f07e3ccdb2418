//! Client side of the transport: the per-connection state machine, the
//! pending-request table it resolves into, the per-endpoint connection pool
//! with its timeout sweeper, and the endpoint-keyed client facade.

pub use connection::ClientConnection;
pub use connection::ConnectionState;
pub use manager::HighwayClient;
pub use pending::PendingRequest;
pub use pending::PendingRequestTable;
pub use pending::ResponseCallback;
pub use pool::ConnectionPool;

mod connection;
mod manager;
mod pending;
mod pool;
