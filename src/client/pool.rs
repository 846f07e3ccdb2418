use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::sync::oneshot;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::connection::ClientConnection;
use crate::client::ResponseCallback;
use crate::protocol::{CodecRegistry, ResponseHeader, RoutingInfo};
use crate::service::ClientConfig;
use crate::{AppError, AppResult};

struct PoolSlot {
    connection: parking_lot::RwLock<Option<Arc<ClientConnection>>>,
    consecutive_failures: AtomicU32,
    next_attempt: parking_lot::Mutex<Instant>,
    connecting: AtomicBool,
}

impl PoolSlot {
    fn new() -> Self {
        PoolSlot {
            connection: parking_lot::RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
            next_attempt: parking_lot::Mutex::new(Instant::now()),
            connecting: AtomicBool::new(false),
        }
    }
}

/// Fixed-size pool of connections to one remote endpoint.
///
/// Outgoing calls fan out round-robin across the slots, skipping any that
/// are not ready; when none are, the call fails immediately rather than
/// blocking. The pool owns every connection's lifecycle: it opens them,
/// replaces faulted ones under exponential backoff, and drives the timeout
/// sweeper across all pending tables.
pub struct ConnectionPool {
    endpoint: String,
    config: ClientConfig,
    codecs: Arc<CodecRegistry>,
    slots: Vec<PoolSlot>,
    cursor: AtomicUsize,
}

impl ConnectionPool {
    pub fn new(
        endpoint: &str,
        config: ClientConfig,
        codecs: Arc<CodecRegistry>,
    ) -> Arc<ConnectionPool> {
        let slots = (0..config.pool_size.max(1)).map(|_| PoolSlot::new()).collect();
        let pool = Arc::new(ConnectionPool {
            endpoint: endpoint.to_string(),
            config,
            codecs,
            slots,
            cursor: AtomicUsize::new(0),
        });

        for index in 0..pool.slots.len() {
            pool.spawn_connect(index);
        }
        start_sweeper(Arc::downgrade(&pool), pool.config.sweep_interval());
        pool
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn ready_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| {
                slot.connection
                    .read()
                    .as_ref()
                    .map(|c| c.is_ready())
                    .unwrap_or(false)
            })
            .count()
    }

    /// Sends one request on the next ready connection. The callback always
    /// fires exactly once; when no connection is ready it fires immediately
    /// with a no-available-connection error, the caller decides whether to
    /// retry.
    pub async fn send(&self, route: &RoutingInfo, body: BytesMut, callback: ResponseCallback) {
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for offset in 0..self.slots.len() {
            let index = (start + offset) % self.slots.len();
            let connection = self.slots[index].connection.read().clone();
            if let Some(connection) = connection {
                if connection.is_ready() {
                    // the connection consumes the callback from here on
                    let _ = connection.send_request(route, body, callback).await;
                    return;
                }
            }
        }
        let _ = callback.send(Err(AppError::NoAvailableConnection(format!(
            "no ready connection to {}",
            self.endpoint
        ))));
    }

    /// Sends one request and awaits its resolution, mapping a nonzero
    /// response status to a remote error.
    pub async fn call(&self, route: &RoutingInfo, body: BytesMut) -> AppResult<BytesMut> {
        let (tx, rx) = oneshot::channel();
        self.send(route, body, tx).await;
        let mut frame = rx.await.map_err(|_| {
            AppError::ConnectionLost(format!("response callback for {} dropped", self.endpoint))
        })??;

        let header = ResponseHeader::read_from(&mut frame.header)?;
        if !header.is_ok() {
            return Err(AppError::RemoteError {
                status: header.status,
                message: header.message,
            });
        }
        Ok(frame.body)
    }

    /// Waits until at least one connection is ready. Startup convenience;
    /// `send` itself never waits.
    pub async fn wait_ready(&self, timeout: Duration) -> AppResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.ready_count() > 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AppError::NoAvailableConnection(format!(
                    "no connection to {} became ready within {:?}",
                    self.endpoint, timeout
                )));
            }
            time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// One sweeper tick: expire pending requests on every connection and
    /// schedule replacement of dead slots.
    fn sweep_and_reconnect(self: &Arc<Self>) {
        let now = Instant::now();
        for (index, slot) in self.slots.iter().enumerate() {
            let connection = slot.connection.read().clone();
            let alive = match connection {
                Some(connection) => {
                    // sweep dead connections too, a send may have raced an
                    // entry in just before the drain
                    connection.sweep_expired();
                    connection.is_alive()
                }
                None => false,
            };
            if !alive && now >= *slot.next_attempt.lock() {
                self.spawn_connect(index);
            }
        }
    }

    fn spawn_connect(self: &Arc<Self>, index: usize) {
        let slot = &self.slots[index];
        if slot.connecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let slot = &pool.slots[index];
            match ClientConnection::open(
                &pool.endpoint,
                pool.config.clone(),
                pool.codecs.clone(),
            )
            .await
            {
                Ok(connection) => {
                    debug!("pool slot {} connected to {}", index, pool.endpoint);
                    *slot.connection.write() = Some(connection);
                    slot.consecutive_failures.store(0, Ordering::SeqCst);
                }
                Err(e) => {
                    let failures = slot.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    let backoff = pool.backoff(failures);
                    warn!(
                        "pool slot {} failed to connect to {} ({} in a row): {}, next attempt in {:?}",
                        index, pool.endpoint, failures, e, backoff
                    );
                    *slot.next_attempt.lock() = Instant::now() + backoff;
                }
            }
            slot.connecting.store(false, Ordering::SeqCst);
        });
    }

    /// Exponential backoff, doubling per consecutive failure up to the
    /// configured cap.
    fn backoff(&self, consecutive_failures: u32) -> Duration {
        let base = self.config.reconnect_backoff_ms.max(1);
        let max = self.config.reconnect_backoff_max_ms.max(base);
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        Duration::from_millis((base.saturating_mul(1u64 << exponent)).min(max))
    }

    /// Fails all in-flight requests and closes every connection.
    pub async fn shutdown(&self) {
        info!("shutting down connection pool for {}", self.endpoint);
        for slot in &self.slots {
            let connection = slot.connection.write().take();
            if let Some(connection) = connection {
                connection.fault("client shutdown").await;
            }
            // leave dead slots alone until the pool itself is dropped
            *slot.next_attempt.lock() = Instant::now() + Duration::from_secs(3600);
        }
    }
}

/// Periodic sweep shared by the pool's connections. Holding only a weak
/// reference lets the task die with the pool.
fn start_sweeper(pool: Weak<ConnectionPool>, interval: Duration) {
    tokio::spawn(async move {
        let mut tick = time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let Some(pool) = pool.upgrade() else {
                break;
            };
            pool.sweep_and_reconnect();
        }
        debug!("pool sweeper exited");
    });
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;
    use tokio::io::BufWriter;
    use tokio::net::TcpListener;

    use crate::network::{Connection, Frame};
    use crate::protocol::LoginResponse;

    use super::*;

    fn test_config(pool_size: usize) -> ClientConfig {
        ClientConfig {
            connect_timeout_ms: 1_000,
            login_timeout_ms: 500,
            request_timeout_ms: 200,
            sweep_interval_ms: 20,
            pool_size,
            reconnect_backoff_ms: 50,
            reconnect_backoff_max_ms: 400,
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let pool = ConnectionPool {
            endpoint: "127.0.0.1:9".to_string(),
            config: test_config(1),
            codecs: Arc::new(CodecRegistry::new()),
            slots: vec![PoolSlot::new()],
            cursor: AtomicUsize::new(0),
        };
        assert_eq!(pool.backoff(1), Duration::from_millis(50));
        assert_eq!(pool.backoff(2), Duration::from_millis(100));
        assert_eq!(pool.backoff(3), Duration::from_millis(200));
        assert_eq!(pool.backoff(4), Duration::from_millis(400));
        // capped from here on
        assert_eq!(pool.backoff(10), Duration::from_millis(400));
        assert_eq!(pool.backoff(40), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_send_with_no_ready_connection_fails_immediately() {
        // nothing listens on this endpoint, connects fail in the background
        let pool = ConnectionPool::new(
            "127.0.0.1:1",
            test_config(2),
            Arc::new(CodecRegistry::new()),
        );
        let (tx, rx) = oneshot::channel();
        let route = RoutingInfo::new("demo", "sample", "echo");
        pool.send(&route, BytesMut::new(), tx).await;
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::NoAvailableConnection(_)));
    }

    /// Fake server that answers logins and swallows every request, so that
    /// only the sweeper can resolve in-flight calls.
    async fn silent_server(listener: TcpListener) {
        loop {
            let Ok((socket, addr)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (reader, writer) = socket.into_split();
                let mut connection =
                    Connection::new(reader, addr.to_string(), 4 * 1024, 1024 * 1024);
                let mut writer = BufWriter::new(writer);
                // answer the login, then read and drop all requests
                if let Ok(Some(login)) = connection.read_frame().await {
                    let response = Frame::encode(
                        login.msg_id,
                        &ResponseHeader::ok().to_bytes(),
                        &LoginResponse::new("highway", "none").to_bytes(),
                    );
                    writer.write_all(&response).await.unwrap();
                    writer.flush().await.unwrap();
                }
                while let Ok(Some(_)) = connection.read_frame().await {}
            });
        }
    }

    #[tokio::test]
    async fn test_sweeper_times_out_unanswered_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        tokio::spawn(silent_server(listener));

        let pool = ConnectionPool::new(&endpoint, test_config(1), Arc::new(CodecRegistry::new()));
        pool.wait_ready(Duration::from_secs(2)).await.unwrap();

        let route = RoutingInfo::new("demo", "sample", "echo");
        let started = Instant::now();
        let err = pool.call(&route, BytesMut::new()).await.unwrap_err();
        assert!(matches!(err, AppError::RequestTimeout(_)));
        // resolved by the sweep, at or after the request timeout
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_pool_replaces_dead_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        tokio::spawn(silent_server(listener));

        let pool = ConnectionPool::new(&endpoint, test_config(1), Arc::new(CodecRegistry::new()));
        pool.wait_ready(Duration::from_secs(2)).await.unwrap();

        // kill the live connection; the sweeper should reopen the slot
        let connection = pool.slots[0].connection.read().clone().unwrap();
        connection.fault("test kill").await;
        assert_eq!(pool.ready_count(), 0);

        pool.wait_ready(Duration::from_secs(2)).await.unwrap();
        assert_eq!(pool.ready_count(), 1);
    }
}
