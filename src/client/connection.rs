use std::mem;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, info, warn};

use crate::client::{PendingRequestTable, ResponseCallback};
use crate::network::{Connection, Frame};
use crate::protocol::{
    CodecRegistry, LoginRequest, LoginResponse, PayloadCodec, RequestHeader, ResponseHeader,
    RoutingInfo,
};
use crate::service::ClientConfig;
use crate::{AppError, AppResult};

/// Client connection lifecycle. Once faulted, a connection releases its
/// socket and pending requests and stays dead; the owning pool replaces it
/// with a freshly opened one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    LoggingIn = 3,
    Ready = 4,
    Faulted = 5,
}

impl ConnectionState {
    fn from_u8(value: u8) -> ConnectionState {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::LoggingIn,
            4 => ConnectionState::Ready,
            5 => ConnectionState::Faulted,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ConnectionState) -> Self {
        StateCell(AtomicU8::new(state as u8))
    }

    fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn swap(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(state as u8, Ordering::SeqCst))
    }
}

/// Protocol parameters agreed during the login handshake.
struct Negotiated {
    protocol: String,
    zip_name: String,
    codec: Arc<dyn PayloadCodec>,
}

/// One TCP connection to a remote endpoint, owned exclusively by a pool
/// slot. Writes are serialized behind an async mutex since in-flight
/// requests complete out of order; reads run on a dedicated spawned task
/// that resolves the pending table by msg_id.
pub struct ClientConnection {
    endpoint: String,
    config: ClientConfig,
    codecs: Arc<CodecRegistry>,
    state: StateCell,
    next_msg_id: AtomicU64,
    pending: PendingRequestTable,
    writer: tokio::sync::Mutex<Option<BufWriter<OwnedWriteHalf>>>,
    negotiated: parking_lot::RwLock<Option<Negotiated>>,
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}

impl ClientConnection {
    pub(crate) fn new(
        endpoint: &str,
        config: ClientConfig,
        codecs: Arc<CodecRegistry>,
    ) -> Arc<ClientConnection> {
        Arc::new(ClientConnection {
            endpoint: endpoint.to_string(),
            config,
            codecs,
            state: StateCell::new(ConnectionState::Disconnected),
            next_msg_id: AtomicU64::new(1),
            pending: PendingRequestTable::new(),
            writer: tokio::sync::Mutex::new(None),
            negotiated: parking_lot::RwLock::new(None),
        })
    }

    /// Connects and performs the login handshake. On any failure the
    /// connection is faulted and the error returned; it is never left
    /// half-open.
    pub async fn open(
        endpoint: &str,
        config: ClientConfig,
        codecs: Arc<CodecRegistry>,
    ) -> AppResult<Arc<ClientConnection>> {
        let connection = ClientConnection::new(endpoint, config, codecs);
        match connection.connect_and_login().await {
            Ok(()) => Ok(connection),
            Err(e) => {
                connection.fault(&e.to_string()).await;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    pub fn is_ready(&self) -> bool {
        self.state.load() == ConnectionState::Ready
    }

    pub fn is_alive(&self) -> bool {
        !matches!(
            self.state.load(),
            ConnectionState::Faulted | ConnectionState::Disconnected
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Negotiated protocol and compression names, present once `Ready`.
    pub fn negotiated_names(&self) -> Option<(String, String)> {
        self.negotiated
            .read()
            .as_ref()
            .map(|n| (n.protocol.clone(), n.zip_name.clone()))
    }

    async fn connect_and_login(self: &Arc<Self>) -> AppResult<()> {
        self.state.store(ConnectionState::Connecting);
        info!("connecting to {}", self.endpoint);

        let stream = time::timeout(
            self.config.connect_timeout(),
            TcpStream::connect(&self.endpoint),
        )
        .await
        .map_err(|_| {
            AppError::DetailedIoError(format!("connect to {} timed out", self.endpoint))
        })?
        .map_err(|e| {
            AppError::DetailedIoError(format!("connect to {} failed: {}", self.endpoint, e))
        })?;

        self.state.store(ConnectionState::Connected);
        let peer_addr = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| self.endpoint.clone());

        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(BufWriter::new(writer));

        let connection = Arc::clone(self);
        tokio::spawn(async move { connection.read_loop(reader, peer_addr).await });

        self.login().await
    }

    /// Login is itself a pending request: the response resolves through the
    /// table like any other, the explicit timeout here is what enforces the
    /// login deadline before the sweeper takes over.
    async fn login(&self) -> AppResult<()> {
        self.state.store(ConnectionState::LoggingIn);

        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        let header = RequestHeader::login().to_bytes();
        let body =
            LoginRequest::new(&self.config.protocol_name, &self.config.zip_name).to_bytes();

        let (tx, rx) = oneshot::channel();
        self.pending.insert(msg_id, self.config.login_timeout(), tx);

        let buffer = Frame::encode(msg_id, &header, &body);
        if let Err(e) = self.write(&buffer).await {
            self.pending.take(msg_id);
            return Err(e);
        }

        let mut frame = match time::timeout(self.config.login_timeout(), rx).await {
            Err(_) => {
                self.pending.take(msg_id);
                return Err(AppError::LoginFailed(format!(
                    "login to {} timed out",
                    self.endpoint
                )));
            }
            Ok(Err(_)) => {
                return Err(AppError::LoginFailed(format!(
                    "connection to {} lost during login",
                    self.endpoint
                )));
            }
            Ok(Ok(Err(e))) => {
                return Err(AppError::LoginFailed(e.to_string()));
            }
            Ok(Ok(Ok(frame))) => frame,
        };

        let response = ResponseHeader::read_from(&mut frame.header)?;
        if !response.is_ok() {
            return Err(AppError::LoginFailed(format!(
                "server rejected login to {}: {}",
                self.endpoint, response.message
            )));
        }

        let accepted = LoginResponse::read_from(&mut frame.body)?;
        let codec = self.codecs.select(&accepted.protocol, &accepted.zip_name)?;
        info!(
            "login to {} success, protocol {}, compression {}",
            self.endpoint, accepted.protocol, accepted.zip_name
        );
        *self.negotiated.write() = Some(Negotiated {
            protocol: accepted.protocol,
            zip_name: accepted.zip_name,
            codec,
        });
        self.state.store(ConnectionState::Ready);
        Ok(())
    }

    /// Sends one request. Only accepted while `Ready`; otherwise the call
    /// fails immediately and never queues. The callback is consumed on every
    /// path, so the caller always gets exactly one resolution: response,
    /// timeout, or connection loss.
    pub async fn send_request(
        &self,
        route: &RoutingInfo,
        body: BytesMut,
        callback: ResponseCallback,
    ) -> AppResult<u64> {
        if !self.is_ready() {
            let message = format!(
                "connection to {} is {:?}, not ready",
                self.endpoint,
                self.state.load()
            );
            let _ = callback.send(Err(AppError::ConnectionNotReady(message.clone())));
            return Err(AppError::ConnectionNotReady(message));
        }

        let codec = match self.negotiated.read().as_ref() {
            Some(negotiated) => negotiated.codec.clone(),
            None => {
                let message = format!("connection to {} has no negotiated codec", self.endpoint);
                let _ = callback.send(Err(AppError::IllegalState(message.clone())));
                return Err(AppError::IllegalState(message));
            }
        };

        let body = match codec.encode(body) {
            Ok(encoded) => encoded,
            Err(e) => {
                let _ = callback.send(Err(AppError::InvalidValue(format!(
                    "failed to encode request body: {}",
                    e
                ))));
                return Err(e);
            }
        };

        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        let header = RequestHeader::request(route.clone()).to_bytes();
        self.pending
            .insert(msg_id, self.config.request_timeout(), callback);

        // the connection may have faulted between the readiness check and the
        // insert; the drain and this re-check race through the same removal
        if !self.is_alive() {
            self.pending.fail(
                msg_id,
                AppError::ConnectionLost(format!("connection to {} lost", self.endpoint)),
            );
            return Err(AppError::ConnectionLost(format!(
                "connection to {} lost",
                self.endpoint
            )));
        }

        let buffer = Frame::encode(msg_id, &header, &body);
        if let Err(e) = self.write(&buffer).await {
            // fail the pending entry inline, then fault the connection
            self.pending.fail(
                msg_id,
                AppError::ConnectionLost(format!("write to {} failed: {}", self.endpoint, e)),
            );
            self.fault(&format!("write error: {}", e)).await;
            return Err(e);
        }
        Ok(msg_id)
    }

    async fn write(&self, buffer: &[u8]) -> AppResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| {
            AppError::ConnectionLost(format!("connection to {} is closed", self.endpoint))
        })?;
        writer.write_all(buffer).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, reader: OwnedReadHalf, peer_addr: String) {
        let mut connection = Connection::new(
            reader,
            peer_addr,
            self.config.conn_read_buffer_size,
            self.config.max_frame_size,
        );
        loop {
            match connection.read_frame().await {
                Ok(Some(frame)) => self.on_frame(frame),
                Ok(None) => {
                    self.fault("connection closed by peer").await;
                    break;
                }
                Err(e) => {
                    self.fault(&format!("read error: {}", e)).await;
                    break;
                }
            }
        }
        debug!("read loop for {} exited", self.endpoint);
    }

    fn on_frame(&self, mut frame: Frame) {
        let msg_id = frame.msg_id;
        let codec = self.negotiated.read().as_ref().map(|n| n.codec.clone());
        if let Some(codec) = codec {
            match codec.decode(mem::take(&mut frame.body)) {
                Ok(body) => frame.body = body,
                Err(e) => {
                    // a body that fails to decode is that request's problem,
                    // not the connection's
                    self.pending.fail(msg_id, e);
                    return;
                }
            }
        }
        self.pending.complete(msg_id, frame);
    }

    /// Releases the socket and fails every pending request with a
    /// connection-lost error, exactly once no matter how many actors observe
    /// the failure.
    pub async fn fault(&self, reason: &str) {
        let previous = self.state.swap(ConnectionState::Faulted);
        if matches!(
            previous,
            ConnectionState::Faulted | ConnectionState::Disconnected
        ) {
            return;
        }
        warn!("connection to {} faulted: {}", self.endpoint, reason);

        let failed = self.pending.fail_all(|| {
            AppError::ConnectionLost(format!("connection to {} lost: {}", self.endpoint, reason))
        });
        if failed > 0 {
            warn!(
                "failed {} pending requests on connection to {}",
                failed, self.endpoint
            );
        }

        // dropping the write half closes our side of the socket
        self.writer.lock().await.take();
        self.state.store(ConnectionState::Disconnected);
    }

    /// Fails every pending entry older than the request timeout. Driven by
    /// the pool's sweeper on a fixed schedule; this is the only mechanism
    /// that frees requests to a peer that never replies.
    pub fn sweep_expired(&self) -> usize {
        let swept = self.pending.sweep_expired();
        if !swept.is_empty() {
            warn!(
                "{} requests timed out on connection to {}",
                swept.len(),
                self.endpoint
            );
        }
        swept.len()
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use crate::protocol::STATUS_LOGIN_REJECTED;

    use super::*;

    fn test_config() -> ClientConfig {
        ClientConfig {
            connect_timeout_ms: 1_000,
            login_timeout_ms: 500,
            request_timeout_ms: 1_000,
            sweep_interval_ms: 20,
            ..ClientConfig::default()
        }
    }

    fn codecs() -> Arc<CodecRegistry> {
        Arc::new(CodecRegistry::new())
    }

    async fn read_one_frame(connection: &mut Connection) -> Frame {
        connection
            .read_frame()
            .await
            .expect("fake server read error")
            .expect("fake server peer closed")
    }

    fn login_ok_response(msg_id: u64) -> BytesMut {
        Frame::encode(
            msg_id,
            &ResponseHeader::ok().to_bytes(),
            &LoginResponse::new("highway", "none").to_bytes(),
        )
    }

    /// Accepts one socket, answers the login handshake, and returns the
    /// split halves for the test to script the rest of the conversation.
    async fn accept_and_login(
        listener: TcpListener,
    ) -> (Connection, BufWriter<OwnedWriteHalf>) {
        let (socket, addr) = listener.accept().await.unwrap();
        let (reader, writer) = socket.into_split();
        let mut connection = Connection::new(reader, addr.to_string(), 4 * 1024, 1024 * 1024);
        let mut writer = BufWriter::new(writer);

        let login = read_one_frame(&mut connection).await;
        let response = login_ok_response(login.msg_id);
        writer.write_all(&response).await.unwrap();
        writer.flush().await.unwrap();
        (connection, writer)
    }

    #[tokio::test]
    async fn test_send_fails_immediately_when_not_ready() {
        let connection = ClientConnection::new("127.0.0.1:9", test_config(), codecs());
        assert_eq!(connection.state(), ConnectionState::Disconnected);

        let (tx, rx) = oneshot::channel();
        let route = RoutingInfo::new("calculator", "basic", "add");
        let err = connection
            .send_request(&route, BytesMut::new(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConnectionNotReady(_)));

        // the callback observed the same failure, exactly once
        let callback_err = rx.await.unwrap().unwrap_err();
        assert!(matches!(callback_err, AppError::ConnectionNotReady(_)));
    }

    #[tokio::test]
    async fn test_send_fails_immediately_while_logging_in() {
        // sends are gated on Ready; any handshake state rejects them without
        // queueing
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::LoggingIn,
        ] {
            let connection = ClientConnection::new("127.0.0.1:9", test_config(), codecs());
            connection.state.store(state);

            let (tx, rx) = oneshot::channel();
            let route = RoutingInfo::new("demo", "sample", "echo");
            let err = connection
                .send_request(&route, BytesMut::new(), tx)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::ConnectionNotReady(_)));
            assert!(matches!(
                rx.await.unwrap().unwrap_err(),
                AppError::ConnectionNotReady(_)
            ));
        }
    }

    #[tokio::test]
    async fn test_open_performs_login_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (_connection, _writer) = accept_and_login(listener).await;
            // keep the socket open until the client is done
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });

        let connection = ClientConnection::open(&endpoint, test_config(), codecs())
            .await
            .unwrap();
        assert_eq!(connection.state(), ConnectionState::Ready);
        assert_eq!(
            connection.negotiated_names(),
            Some(("highway".to_string(), "none".to_string()))
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_login_rejection_faults_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (socket, addr) = listener.accept().await.unwrap();
            let (reader, writer) = socket.into_split();
            let mut connection = Connection::new(reader, addr.to_string(), 4 * 1024, 1024 * 1024);
            let mut writer = BufWriter::new(writer);
            let login = read_one_frame(&mut connection).await;
            let response = Frame::encode(
                login.msg_id,
                &ResponseHeader::error(STATUS_LOGIN_REJECTED, "unsupported protocol").to_bytes(),
                &[],
            );
            writer.write_all(&response).await.unwrap();
            writer.flush().await.unwrap();
        });

        let err = ClientConnection::open(&endpoint, test_config(), codecs())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::LoginFailed(_)));
    }

    #[tokio::test]
    async fn test_login_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        // accept but never answer the login
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });

        let err = ClientConnection::open(&endpoint, test_config(), codecs())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::LoginFailed(_)));
    }

    #[tokio::test]
    async fn test_pipelined_responses_resolve_by_msg_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut connection, mut writer) = accept_and_login(listener).await;
            // collect both requests, then answer them in reverse order
            let first = read_one_frame(&mut connection).await;
            let second = read_one_frame(&mut connection).await;
            for request in [second, first] {
                let body = format!("reply-{}", request.msg_id);
                let response = Frame::encode(
                    request.msg_id,
                    &ResponseHeader::ok().to_bytes(),
                    body.as_bytes(),
                );
                writer.write_all(&response).await.unwrap();
            }
            writer.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });

        let connection = ClientConnection::open(&endpoint, test_config(), codecs())
            .await
            .unwrap();
        let route = RoutingInfo::new("demo", "sample", "echo");

        let (tx1, rx1) = oneshot::channel();
        let id1 = connection
            .send_request(&route, BytesMut::new(), tx1)
            .await
            .unwrap();
        let (tx2, rx2) = oneshot::channel();
        let id2 = connection
            .send_request(&route, BytesMut::new(), tx2)
            .await
            .unwrap();

        let frame1 = rx1.await.unwrap().unwrap();
        let frame2 = rx2.await.unwrap().unwrap();
        assert_eq!(&frame1.body[..], format!("reply-{}", id1).as_bytes());
        assert_eq!(&frame2.body[..], format!("reply-{}", id2).as_bytes());
    }

    #[tokio::test]
    async fn test_peer_close_fails_pending_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut connection, writer) = accept_and_login(listener).await;
            // swallow one request, then drop the socket without answering
            let _ = read_one_frame(&mut connection).await;
            drop(writer);
        });

        let connection = ClientConnection::open(&endpoint, test_config(), codecs())
            .await
            .unwrap();
        let route = RoutingInfo::new("demo", "sample", "echo");
        let (tx, rx) = oneshot::channel();
        connection
            .send_request(&route, BytesMut::new(), tx)
            .await
            .unwrap();

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::ConnectionLost(_)));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(connection.pending_count(), 0);
    }
}
