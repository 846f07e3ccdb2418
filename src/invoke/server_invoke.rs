use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::network::Frame;
use crate::protocol::{
    PayloadCodec, ResponseHeader, RoutingInfo, STATUS_DECODE_ERROR, STATUS_OPERATION_NOT_FOUND,
    STATUS_SERVER_ERROR,
};
use crate::{AppError, AppResult};

use super::Invoker;

/// One REQUEST frame handed off by a connection handler to the invoke
/// worker pool, together with everything needed to answer it.
#[derive(Debug)]
pub struct RequestTask {
    pub connection_id: u64,
    pub peer_addr: String,
    pub msg_id: u64,
    pub route: RoutingInfo,
    pub body: BytesMut,
    pub codec: Arc<dyn PayloadCodec>,
    /// encoded response frames funnel through the connection's writer task
    pub response_tx: mpsc::Sender<BytesMut>,
}

/// Builds a response frame carrying the given header and body.
pub(crate) fn response_frame(msg_id: u64, header: &ResponseHeader, body: &[u8]) -> BytesMut {
    Frame::encode(msg_id, &header.to_bytes(), body)
}

pub struct ServerInvoke;

impl ServerInvoke {
    /// Resolves and runs the target operation, then writes a response frame
    /// tagged with the original msg_id. Every request gets a correlated
    /// answer, success or failure; the only cases without one are connection
    /// loss and the caller's own timeout sweep.
    pub async fn execute(task: RequestTask, invoker: Arc<dyn Invoker>) {
        let RequestTask {
            connection_id,
            peer_addr,
            msg_id,
            route,
            body,
            codec,
            response_tx,
        } = task;

        let response = match Self::run(&route, body, codec.as_ref(), invoker).await {
            Ok(result) => match codec.encode(result) {
                Ok(encoded) => response_frame(msg_id, &ResponseHeader::ok(), &encoded),
                Err(e) => {
                    warn!(
                        "failed to encode result of {} for {}: {}",
                        route, peer_addr, e
                    );
                    response_frame(
                        msg_id,
                        &ResponseHeader::error(STATUS_SERVER_ERROR, &e.to_string()),
                        &[],
                    )
                }
            },
            Err(e) => {
                warn!(
                    "invocation of {} failed for connection {}: {}",
                    route, connection_id, e
                );
                response_frame(
                    msg_id,
                    &ResponseHeader::error(Self::status_of(&e), &e.to_string()),
                    &[],
                )
            }
        };

        if response_tx.send(response).await.is_err() {
            // connection is gone, the client will observe connection loss
            error!(
                "connection {} writer dropped before response, msg_id {}",
                connection_id, msg_id
            );
        }
    }

    async fn run(
        route: &RoutingInfo,
        body: BytesMut,
        codec: &dyn PayloadCodec,
        invoker: Arc<dyn Invoker>,
    ) -> AppResult<BytesMut> {
        let handler = invoker
            .resolve(route)
            .ok_or_else(|| AppError::OperationNotFound(route.to_string()))?;
        let args = codec.decode(body)?;
        handler.invoke(args).await
    }

    fn status_of(error: &AppError) -> i32 {
        match error {
            AppError::OperationNotFound(_) => STATUS_OPERATION_NOT_FOUND,
            AppError::MalformedProtocol(_) | AppError::InvalidValue(_) => STATUS_DECODE_ERROR,
            _ => STATUS_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Buf, BufMut};

    use crate::invoke::OperationRegistry;
    use crate::protocol::RawCodec;

    use super::*;

    fn add_registry() -> Arc<OperationRegistry> {
        let registry = OperationRegistry::new();
        registry.register(
            "calculator",
            "basic",
            "add",
            |mut args: BytesMut| async move {
                if args.remaining() < 8 {
                    return Err(AppError::InvalidValue("add needs two i32 args".to_string()));
                }
                let a = args.get_i32();
                let b = args.get_i32();
                let mut out = BytesMut::with_capacity(4);
                out.put_i32(a + b);
                Ok(out)
            },
        );
        Arc::new(registry)
    }

    async fn response_of(
        route: RoutingInfo,
        body: BytesMut,
        invoker: Arc<OperationRegistry>,
    ) -> (ResponseHeader, BytesMut) {
        let (tx, mut rx) = mpsc::channel(1);
        let task = RequestTask {
            connection_id: 1,
            peer_addr: "test".to_string(),
            msg_id: 77,
            route,
            body,
            codec: Arc::new(RawCodec),
            response_tx: tx,
        };
        ServerInvoke::execute(task, invoker).await;
        let mut encoded = rx.recv().await.unwrap();
        let mut frame = Frame::parse(&mut encoded, 1024 * 1024).unwrap().unwrap();
        assert_eq!(frame.msg_id, 77);
        let header = ResponseHeader::read_from(&mut frame.header).unwrap();
        (header, frame.body)
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let mut body = BytesMut::new();
        body.put_i32(2);
        body.put_i32(3);
        let route = RoutingInfo::new("calculator", "basic", "add");
        let (header, mut result) = response_of(route, body, add_registry()).await;
        assert!(header.is_ok());
        assert_eq!(result.get_i32(), 5);
    }

    #[tokio::test]
    async fn test_unknown_operation_yields_error_response() {
        let route = RoutingInfo::new("calculator", "basic", "subtract");
        let (header, _) = response_of(route, BytesMut::new(), add_registry()).await;
        assert_eq!(header.status, STATUS_OPERATION_NOT_FOUND);
        assert!(header.message.contains("subtract"));
    }

    #[tokio::test]
    async fn test_handler_error_yields_error_response() {
        // only one argument, the handler reports invalid input
        let mut body = BytesMut::new();
        body.put_i32(2);
        let route = RoutingInfo::new("calculator", "basic", "add");
        let (header, _) = response_of(route, body, add_registry()).await;
        assert_eq!(header.status, STATUS_DECODE_ERROR);
        assert!(header.message.contains("two i32 args"));
    }
}
