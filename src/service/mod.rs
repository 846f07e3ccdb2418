//! Service layer: the TCP server with its connection handlers and invoke
//! worker pool, the host bootstrap, and the ambient stack (errors, config,
//! shutdown broadcast, tracing setup).

pub use app_error::AppError;
pub use app_error::AppResult;
pub use config::global_config;
pub use config::ClientConfig;
pub use config::HighwayConfig;
pub use config::InvokeWorkerPool;
pub use config::NetworkConfig;
pub use config::GLOBAL_CONFIG;
pub use host::HighwayHost;
pub use server::Server;
pub use shutdown::Shutdown;
pub use tracing_config::setup_local_tracing;
pub use tracing_config::setup_tracing;
pub use tracing_config::LogGuard;

mod app_error;
mod config;
mod host;
mod server;
mod shutdown;
mod tracing_config;
