use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::{runtime, signal};
use tracing::{error, info, trace};

use crate::invoke::Invoker;
use crate::protocol::CodecRegistry;
use crate::service::Server;
use crate::AppError::IllegalState;
use crate::{AppResult, HighwayConfig};

/// Process-level entry point for the server side: builds the runtime, binds
/// the listener and runs the accept loop until ctrl-c, then drives the
/// graceful-shutdown sequence (broadcast the signal, wait for every
/// connection handler to drop its completion sender).
pub struct HighwayHost {
    config: HighwayConfig,
    invoker: Arc<dyn Invoker>,
    codecs: Arc<CodecRegistry>,
}

impl HighwayHost {
    pub fn new(config: HighwayConfig, invoker: Arc<dyn Invoker>) -> Self {
        HighwayHost {
            config,
            invoker,
            codecs: Arc::new(CodecRegistry::new()),
        }
    }

    pub fn with_codecs(
        config: HighwayConfig,
        invoker: Arc<dyn Invoker>,
        codecs: Arc<CodecRegistry>,
    ) -> Self {
        HighwayHost {
            config,
            invoker,
            codecs,
        }
    }

    pub fn start(&self) -> AppResult<()> {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

        let rt = runtime::Builder::new_multi_thread().enable_all().build()?;

        rt.block_on(self.run_tcp_server(notify_shutdown.clone(), shutdown_complete_tx))?;

        // tcp server has been shut down, notify every remaining task
        let _ = notify_shutdown.send(());
        trace!("waiting for shutdown complete...");
        rt.block_on(shutdown_complete_rx.recv());
        info!("server shutdown complete");
        Ok(())
    }

    async fn run_tcp_server(
        &self,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> AppResult<()> {
        let network_conf = &self.config.network;
        let listen_address = format!("{}:{}", network_conf.ip, network_conf.port);

        let bind_result = TcpListener::bind(&listen_address).await;
        if let Err(err) = &bind_result {
            let error_msg = format!(
                "Failed to bind server to address: {} - Error: {}",
                listen_address, err
            );
            error!(error_msg);
            return Err(IllegalState(error_msg));
        }
        info!("tcp server binding to {} for listening", &listen_address);

        let server = Server::new(
            bind_result?,
            Arc::new(Semaphore::new(network_conf.max_connection)),
            notify_shutdown,
            shutdown_complete_tx,
            self.invoker.clone(),
            self.codecs.clone(),
            network_conf.clone(),
            self.config.invoke_worker_pool.clone(),
        );
        tokio::select! {
          res = server.run() => {
              if let Err(err) = res {
                  error!(cause = %err, "failed to accept");
              }
          }
          _ = signal::ctrl_c() => {
              info!("get shutdown signal");
          }
        }

        Ok(())
    }
}
