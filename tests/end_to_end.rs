use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};

use highway::{
    AppError, ClientConfig, CodecRegistry, HighwayClient, InvokeWorkerPool, NetworkConfig,
    OperationRegistry, RoutingInfo, Server,
};

fn sample_registry() -> Arc<OperationRegistry> {
    let registry = OperationRegistry::new();
    registry.register("demo", "sample", "echo", |args: BytesMut| async move {
        Ok(args)
    });
    registry.register(
        "calculator",
        "basic",
        "add",
        |mut args: BytesMut| async move {
            let a = args.get_i32();
            let b = args.get_i32();
            let mut out = BytesMut::with_capacity(4);
            out.put_i32(a + b);
            Ok(out)
        },
    );
    Arc::new(registry)
}

async fn start_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();

    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, _shutdown_complete_rx) = mpsc::channel(1);
    let server = Server::new(
        listener,
        Arc::new(Semaphore::new(32)),
        notify_shutdown,
        shutdown_complete_tx,
        sample_registry(),
        Arc::new(CodecRegistry::new()),
        NetworkConfig::default(),
        InvokeWorkerPool {
            channel_capacity: 32,
            num_channels: 2,
        },
    );
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    endpoint
}

fn client_config() -> ClientConfig {
    ClientConfig {
        connect_timeout_ms: 1_000,
        login_timeout_ms: 1_000,
        request_timeout_ms: 2_000,
        sweep_interval_ms: 20,
        pool_size: 2,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_login_then_invoke_over_public_api() {
    let endpoint = start_server().await;
    let client = HighwayClient::new(client_config());
    client
        .wait_ready(&endpoint, Duration::from_secs(2))
        .await
        .unwrap();

    let mut args = BytesMut::new();
    args.put_i32(2);
    args.put_i32(3);
    let mut sum = client
        .call(&endpoint, &RoutingInfo::new("calculator", "basic", "add"), args)
        .await
        .unwrap();
    assert_eq!(sum.get_i32(), 5);

    let echoed = client
        .call(
            &endpoint,
            &RoutingInfo::new("demo", "sample", "echo"),
            BytesMut::from(&b"roundabout"[..]),
        )
        .await
        .unwrap();
    assert_eq!(&echoed[..], b"roundabout");

    let err = client
        .call(
            &endpoint,
            &RoutingInfo::new("demo", "sample", "missing"),
            BytesMut::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RemoteError { .. }));

    client.shutdown().await;
}
