use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use dashmap::DashMap;

use crate::client::{ConnectionPool, ResponseCallback};
use crate::protocol::{CodecRegistry, RoutingInfo};
use crate::service::ClientConfig;
use crate::AppResult;

/// Client-side entry point: one connection pool per remote endpoint,
/// created lazily on first use and reused for every later call.
pub struct HighwayClient {
    config: ClientConfig,
    codecs: Arc<CodecRegistry>,
    pools: DashMap<String, Arc<ConnectionPool>>,
}

impl HighwayClient {
    pub fn new(config: ClientConfig) -> Self {
        HighwayClient {
            config,
            codecs: Arc::new(CodecRegistry::new()),
            pools: DashMap::new(),
        }
    }

    pub fn with_codecs(config: ClientConfig, codecs: Arc<CodecRegistry>) -> Self {
        HighwayClient {
            config,
            codecs,
            pools: DashMap::new(),
        }
    }

    pub fn pool(&self, endpoint: &str) -> Arc<ConnectionPool> {
        self.pools
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                ConnectionPool::new(endpoint, self.config.clone(), self.codecs.clone())
            })
            .clone()
    }

    /// Invokes an operation on a remote endpoint and awaits the result body.
    pub async fn call(
        &self,
        endpoint: &str,
        route: &RoutingInfo,
        body: BytesMut,
    ) -> AppResult<BytesMut> {
        self.pool(endpoint).call(route, body).await
    }

    /// Fire-and-await-later variant; the callback resolves exactly once.
    pub async fn send(
        &self,
        endpoint: &str,
        route: &RoutingInfo,
        body: BytesMut,
        callback: ResponseCallback,
    ) {
        self.pool(endpoint).send(route, body, callback).await;
    }

    /// Waits until the endpoint has at least one ready connection.
    pub async fn wait_ready(&self, endpoint: &str, timeout: Duration) -> AppResult<()> {
        self.pool(endpoint).wait_ready(timeout).await
    }

    pub async fn shutdown(&self) {
        let pools: Vec<Arc<ConnectionPool>> =
            self.pools.iter().map(|entry| entry.value().clone()).collect();
        self.pools.clear();
        for pool in pools {
            pool.shutdown().await;
        }
    }
}
