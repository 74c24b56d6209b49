use std::sync::Arc;
use std::time::Duration;

use logwarden_config::{AnalyzerConfig, ProcessorConfig};
use logwarden_core::analyze::LogAnalyzer;
use logwarden_core::process::LogProcessor;
use logwarden_core::storage::{Cache, LogStore, MemoryStorage};
use logwarden_server::ingest::{self, ConnectionRegistry};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

struct TestServer {
    addr: std::net::SocketAddr,
    storage: Arc<MemoryStorage>,
    processor: Arc<LogProcessor>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<Notify>,
}

async fn start_server() -> TestServer {
    let storage = Arc::new(MemoryStorage::new());

    let analyzer = Arc::new(LogAnalyzer::new(AnalyzerConfig {
        analyze_interval: Duration::from_millis(10),
        store_results: false,
        ..AnalyzerConfig::default()
    }));
    let processor = Arc::new(LogProcessor::new(
        ProcessorConfig {
            process_interval: Duration::from_millis(10),
            ..ProcessorConfig::default()
        },
        analyzer,
        Some(storage.clone() as Arc<dyn Cache>),
        Some(storage.clone() as Arc<dyn LogStore>),
    ));
    processor.start();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = Arc::new(ConnectionRegistry::default());
    let shutdown = Arc::new(Notify::new());

    {
        let processor = Arc::clone(&processor);
        let registry = Arc::clone(&registry);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            ingest::serve(listener, processor, registry, 64 * 1024, shutdown).await;
        });
    }

    TestServer {
        addr,
        storage,
        processor,
        registry,
        shutdown,
    }
}

async fn wait_until(mut cond: impl AsyncFnMut() -> bool, what: &str) {
    for _ in 0..300 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn frames_over_tcp_become_archived_records() {
    let server = start_server().await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(
            b"{\"id\":\"net-1\",\"level\":\"ERROR\",\"source\":\"worker\",\"message\":\"disk full\"}\r\n",
        )
        .await
        .unwrap();
    stream.write_all(b"plain text line\r\n").await.unwrap();
    stream.flush().await.unwrap();

    let storage = Arc::clone(&server.storage);
    wait_until(
        async || storage.get_record("net-1").await.unwrap().is_some(),
        "JSON frame archived",
    )
    .await;

    let record = server.storage.get_record("net-1").await.unwrap().unwrap();
    assert_eq!(record.level, "ERROR");
    assert_eq!(record.source, "worker");
    assert_eq!(record.message, "disk full");

    // The plain-text frame had no producer id, so it keeps its transport id.
    let storage = Arc::clone(&server.storage);
    wait_until(
        async || {
            storage
                .get_record("tcp-0-1")
                .await
                .unwrap()
                .map(|r| r.message == "plain text line")
                .unwrap_or(false)
        },
        "text frame archived",
    )
    .await;

    server.shutdown.notify_waiters();
    server.processor.stop().await;
}

#[tokio::test]
async fn disconnects_clean_up_the_registry() {
    let server = start_server().await;

    let stream = TcpStream::connect(server.addr).await.unwrap();
    wait_until(
        {
            let registry = Arc::clone(&server.registry);
            async move || registry.len() == 1
        },
        "connection registered",
    )
    .await;

    drop(stream);
    wait_until(
        {
            let registry = Arc::clone(&server.registry);
            async move || registry.is_empty()
        },
        "connection unregistered",
    )
    .await;

    server.shutdown.notify_waiters();
    server.processor.stop().await;
}

#[tokio::test]
async fn oversize_frames_drop_the_connection_but_not_the_server() {
    let server = start_server().await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let huge = vec![b'a'; 128 * 1024];
    // No terminator: the server hits its frame cap and closes on us.
    let _ = stream.write_all(&huge).await;
    let _ = stream.flush().await;

    wait_until(
        {
            let registry = Arc::clone(&server.registry);
            async move || registry.is_empty()
        },
        "oversize connection dropped",
    )
    .await;

    // A fresh connection still works.
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"{\"id\":\"after\",\"message\":\"still alive\"}\r\n")
        .await
        .unwrap();
    stream.flush().await.unwrap();

    let storage = Arc::clone(&server.storage);
    wait_until(
        async || storage.get_record("after").await.unwrap().is_some(),
        "frame after oversize connection",
    )
    .await;

    server.shutdown.notify_waiters();
    server.processor.stop().await;
}
