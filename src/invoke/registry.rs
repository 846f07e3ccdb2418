use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;

use crate::protocol::RoutingInfo;
use crate::AppResult;

pub type InvokeFuture = Pin<Box<dyn Future<Output = AppResult<BytesMut>> + Send>>;

/// One registered operation. Handlers may complete synchronously or
/// asynchronously; the returned future is awaited on an invoke worker, never
/// on a connection's read loop.
pub trait OperationHandler: Send + Sync + 'static {
    fn invoke(&self, args: BytesMut) -> InvokeFuture;
}

impl<F, Fut> OperationHandler for F
where
    F: Fn(BytesMut) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<BytesMut>> + Send + 'static,
{
    fn invoke(&self, args: BytesMut) -> InvokeFuture {
        Box::pin(self(args))
    }
}

/// Operation dispatch seam consumed by the server side of the transport.
/// Implemented by the schema layer, which knows every operation at startup.
pub trait Invoker: Send + Sync + 'static {
    fn resolve(&self, route: &RoutingInfo) -> Option<Arc<dyn OperationHandler>>;
}

impl std::fmt::Debug for dyn Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invoker")
    }
}

/// Explicit registration table mapping (service, schema, operation) to a
/// handler, populated once at startup. Lookups are lock-free reads.
pub struct OperationRegistry {
    table: DashMap<RoutingInfo, Arc<dyn OperationHandler>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        OperationRegistry {
            table: DashMap::new(),
        }
    }

    pub fn register<H>(&self, dest_service: &str, schema_id: &str, operation_id: &str, handler: H)
    where
        H: OperationHandler,
    {
        self.table.insert(
            RoutingInfo::new(dest_service, schema_id, operation_id),
            Arc::new(handler),
        );
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        OperationRegistry::new()
    }
}

impl Invoker for OperationRegistry {
    fn resolve(&self, route: &RoutingInfo) -> Option<Arc<dyn OperationHandler>> {
        self.table.get(route).map(|entry| entry.value().clone())
    }
}
