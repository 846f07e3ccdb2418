//! Operation dispatch: the `Invoker` seam consumed by the server transport,
//! the startup registration table that implements it, and the server-side
//! invocation path that always answers with a correlated response frame.

pub use registry::InvokeFuture;
pub use registry::Invoker;
pub use registry::OperationHandler;
pub use registry::OperationRegistry;
pub use server_invoke::RequestTask;
pub use server_invoke::ServerInvoke;
pub(crate) use server_invoke::response_frame;

mod registry;
mod server_invoke;
