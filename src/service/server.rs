use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::invoke::{response_frame, Invoker, RequestTask, ServerInvoke};
use crate::network::Connection;
use crate::protocol::{
    CodecRegistry, LoginRequest, LoginResponse, MsgType, PayloadCodec, RequestHeader,
    ResponseHeader, STATUS_LOGIN_REJECTED, STATUS_LOGIN_REQUIRED,
};
use crate::service::config::{InvokeWorkerPool, NetworkConfig};
use crate::service::Shutdown;
use crate::{AppError, AppResult};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// a failed login is a per-request failure; only repetition beyond this
/// threshold closes the socket
const MAX_FAILED_LOGINS: u32 = 3;

const RESPONSE_CHANNEL_CAPACITY: usize = 64;

fn start_invoke_workers(
    invoker: Arc<dyn Invoker>,
    pool_config: &InvokeWorkerPool,
    notify_shutdown: broadcast::Sender<()>,
) -> async_channel::Sender<RequestTask> {
    let (request_tx, request_rx) = async_channel::bounded(pool_config.channel_capacity);
    let worker_count = pool_config.worker_count();
    for i in 0..worker_count {
        let rx: async_channel::Receiver<RequestTask> = request_rx.clone();
        let invoker = invoker.clone();
        let mut shutdown = Shutdown::subscribe(&notify_shutdown);
        tokio::spawn(async move {
            debug!("invoke worker {} started", i);
            loop {
                let task = tokio::select! {
                    task = rx.recv() => match task {
                        Ok(task) => task,
                        Err(_) => break,
                    },
                    _ = shutdown.recv() => break,
                };
                ServerInvoke::execute(task, invoker.clone()).await;
            }
            debug!("invoke worker {} exited", i);
        });
    }
    request_tx
}

/// Owns the write half of one accepted socket. Invocations complete out of
/// order on the worker pool, so every response funnels through this single
/// writer; that is the whole synchronization story for the write path.
fn start_connection_writer(
    writer: OwnedWriteHalf,
    mut response_rx: mpsc::Receiver<BytesMut>,
    connection_id: u64,
) {
    tokio::spawn(async move {
        let mut writer = BufWriter::new(writer);
        while let Some(response) = response_rx.recv().await {
            if let Err(e) = writer.write_all(&response).await {
                error!("connection {} write error: {}", connection_id, e);
                break;
            }
            if let Err(e) = writer.flush().await {
                error!("connection {} flush error: {}", connection_id, e);
                break;
            }
        }
        debug!("connection {} writer exited", connection_id);
    });
}

/// Per-socket negotiation state, owned by the connection's handler task.
/// `codec` doubles as the logged-in flag; requests are rejected until a
/// login has set it.
struct ServerSession {
    codec: Option<Arc<dyn PayloadCodec>>,
    failed_logins: u32,
}

impl ServerSession {
    fn new() -> Self {
        ServerSession {
            codec: None,
            failed_logins: 0,
        }
    }
}

// handler for each accepted connection
struct ConnectionHandler {
    notify_shutdown: broadcast::Sender<()>,
    _shutdown_complete_tx: mpsc::Sender<()>,
    connection_id: u64,
    connection: Connection,
    response_tx: mpsc::Sender<BytesMut>,
    request_tx: async_channel::Sender<RequestTask>,
    codecs: Arc<CodecRegistry>,
    session: ServerSession,
}

impl ConnectionHandler {
    async fn handle_connection(&mut self) -> AppResult<()> {
        let mut shutdown = Shutdown::subscribe(&self.notify_shutdown);
        loop {
            // a framing error is fatal for the socket and surfaces here as Err
            let maybe_frame = tokio::select! {
                res = self.connection.read_frame() => res?,
                _ = shutdown.recv() => {
                    debug!("connection handler exit read loop after recv shutdown signal");
                    return Ok(());
                }
            };

            let mut frame = match maybe_frame {
                Some(frame) => frame,
                // client closed the connection gracefully
                None => break,
            };

            let header = match RequestHeader::read_from(&mut frame.header) {
                Ok(header) => header,
                Err(e) => {
                    warn!(
                        "connection {}: dropping frame with undecodable header: {}",
                        self.connection_id, e
                    );
                    continue;
                }
            };

            match header.msg_type {
                MsgType::Login => self.handle_login(frame.msg_id, frame.body).await?,
                MsgType::Request => {
                    self.handle_request(frame.msg_id, header, frame.body).await?
                }
                MsgType::Response => {
                    warn!(
                        "connection {}: unexpected response frame, msg_id {}",
                        self.connection_id, frame.msg_id
                    );
                }
            }
        }
        debug!("connection handler exit read loop");

        Ok(())
    }

    /// Validates the login preference and always answers with the same
    /// msg_id. A rejected login does not close the socket unless the peer
    /// keeps failing.
    async fn handle_login(&mut self, msg_id: u64, mut body: BytesMut) -> AppResult<()> {
        let outcome = LoginRequest::read_from(&mut body).and_then(|login| {
            self.codecs
                .select(&login.protocol, &login.zip_name)
                .map(|codec| (login, codec))
        });

        let response = match outcome {
            Ok((login, codec)) => {
                info!(
                    "connection {} from {} logged in, protocol {}, compression {}",
                    self.connection_id, self.connection.peer_addr, login.protocol, login.zip_name
                );
                self.session.codec = Some(codec);
                response_frame(
                    msg_id,
                    &ResponseHeader::ok(),
                    &LoginResponse::new(&login.protocol, &login.zip_name).to_bytes(),
                )
            }
            Err(e) => {
                self.session.failed_logins += 1;
                warn!(
                    "connection {} login rejected ({} so far): {}",
                    self.connection_id, self.session.failed_logins, e
                );
                response_frame(
                    msg_id,
                    &ResponseHeader::error(STATUS_LOGIN_REJECTED, &e.to_string()),
                    &[],
                )
            }
        };

        self.write_response(response).await?;

        if self.session.failed_logins > MAX_FAILED_LOGINS {
            return Err(AppError::IllegalState(format!(
                "connection {}: too many failed logins",
                self.connection_id
            )));
        }
        Ok(())
    }

    async fn handle_request(
        &mut self,
        msg_id: u64,
        header: RequestHeader,
        body: BytesMut,
    ) -> AppResult<()> {
        let Some(codec) = self.session.codec.clone() else {
            warn!(
                "connection {}: request before login, msg_id {}",
                self.connection_id, msg_id
            );
            let response = response_frame(
                msg_id,
                &ResponseHeader::error(STATUS_LOGIN_REQUIRED, "login required before requests"),
                &[],
            );
            return self.write_response(response).await;
        };

        let task = RequestTask {
            connection_id: self.connection_id,
            peer_addr: self.connection.peer_addr.clone(),
            msg_id,
            route: header.route,
            body,
            codec,
            response_tx: self.response_tx.clone(),
        };
        self.request_tx
            .send(task)
            .await
            .map_err(|e| AppError::ChannelSendError(e.to_string()))
    }

    async fn write_response(&self, response: BytesMut) -> AppResult<()> {
        self.response_tx
            .send(response)
            .await
            .map_err(|e| AppError::ChannelSendError(e.to_string()))
    }
}

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    invoker: Arc<dyn Invoker>,
    codecs: Arc<CodecRegistry>,
    network_config: NetworkConfig,
    worker_pool_config: InvokeWorkerPool,
}

impl Server {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        listener: TcpListener,
        limit_connections: Arc<Semaphore>,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
        invoker: Arc<dyn Invoker>,
        codecs: Arc<CodecRegistry>,
        network_config: NetworkConfig,
        worker_pool_config: InvokeWorkerPool,
    ) -> Self {
        Server {
            listener,
            limit_connections,
            notify_shutdown,
            shutdown_complete_tx,
            invoker,
            codecs,
            network_config,
            worker_pool_config,
        }
    }

    /// Accepts connections until the listener fails or shutdown is
    /// signalled. Each accepted socket gets its own handler task for the
    /// read loop and a writer task for responses; the semaphore bounds the
    /// number of concurrent connections.
    pub async fn run(&self) -> AppResult<()> {
        let request_sender = start_invoke_workers(
            self.invoker.clone(),
            &self.worker_pool_config,
            self.notify_shutdown.clone(),
        );
        let buffer_size = self.network_config.conn_read_buffer_size;
        let max_frame_size = self.network_config.max_frame_size;

        loop {
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .unwrap();

            let socket = self.accept().await?;

            let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
            let peer_addr = socket
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            debug!("accepted connection {} from {}", connection_id, peer_addr);

            let (reader, writer) = socket.into_split();
            let (response_tx, response_rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
            start_connection_writer(writer, response_rx, connection_id);

            let mut handler = ConnectionHandler {
                _shutdown_complete_tx: self.shutdown_complete_tx.clone(),
                notify_shutdown: self.notify_shutdown.clone(),
                connection_id,
                connection: Connection::new(reader, peer_addr, buffer_size, max_frame_size),
                response_tx,
                request_tx: request_sender.clone(),
                codecs: self.codecs.clone(),
                session: ServerSession::new(),
            };

            tokio::spawn(async move {
                if let Err(err) = handler.handle_connection().await {
                    error!("connection error: {:?}", err);
                }
                // whether gracefully or unexpectedly closed, release connection
                drop(permit);
            });
        }
    }

    async fn accept(&self) -> AppResult<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::DetailedIoError(format!(
                            "accept tcp server error: {}",
                            err
                        )));
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        debug!("tcp server dropped");
    }
}
impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        debug!("connection handler dropped");
    }
}
