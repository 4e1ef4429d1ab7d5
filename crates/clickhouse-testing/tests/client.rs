#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Pooled client behavior against the mock server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ch_protocol::exception::codes;
use clickhouse_client::{Client, CompressionMethod, Error, OpenStrategy, Options};
use clickhouse_testing::{MockServer, eventually, unused_addr};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn client(server: &MockServer, configure: impl FnOnce(Options) -> Options) -> Client {
    Client::open(configure(Options::new(server.addr()))).unwrap()
}

#[tokio::test]
async fn test_open_does_not_connect() {
    let server = MockServer::start().await.unwrap();
    let _client = client(&server, |o| o);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(server.stats().connections, 0);
}

#[tokio::test]
async fn test_sessions_are_reused() {
    init_tracing();
    let server = MockServer::start().await.unwrap();
    let client = client(&server, |o| o);

    for _ in 0..5 {
        client.ping().await.unwrap();
    }
    assert_eq!(server.stats().handshakes, 1);
    assert_eq!(server.stats().pings, 5);

    let metrics = client.metrics();
    assert_eq!(metrics.connections_created, 1);
    assert_eq!(metrics.checkouts_reused, 4);
    assert_eq!(client.status().idle, 1);
    assert_eq!(client.status().in_use, 0);
}

#[tokio::test]
async fn test_query_row_and_bind() {
    let server = MockServer::start().await.unwrap();
    let client = client(&server, |o| o);

    let row = client
        .query_row("SELECT ?", &[42u64.into()])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get::<u64>(0).unwrap(), 42);
    assert_eq!(server.last_query().unwrap().query, "SELECT 42");

    let count = client
        .query_row("SELECT number FROM numbers(25)", &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(count.get::<u64>(0).unwrap(), 0);
    // the rest of the result was drained, so the session went back to idle
    assert_eq!(client.status().idle, 1);
    assert_eq!(client.metrics().connections_created, 1);
}

#[tokio::test]
async fn test_server_exception_keeps_pooled_session() {
    let server = MockServer::start().await.unwrap();
    let client = client(&server, |o| o);

    let err = client.exec("NOT A STATEMENT", &[]).await.unwrap_err();
    assert_eq!(err.server_code(), Some(codes::SYNTAX_ERROR));
    assert!(!err.is_fatal_to_session());

    client.ping().await.unwrap();
    assert_eq!(client.metrics().connections_created, 1);
    assert_eq!(client.metrics().discarded_unhealthy, 0);
}

#[tokio::test]
async fn test_errored_session_is_never_handed_out_again() {
    let server = MockServer::start().await.unwrap();
    let client = client(&server, |o| o);

    client.ping().await.unwrap();
    assert!(client.query("SELECT corrupt()", &[]).await.is_err());

    assert_eq!(client.metrics().discarded_unhealthy, 1);
    assert_eq!(client.status().idle, 0);

    let session = client.acquire().await.unwrap();
    assert!(session.is_healthy());
    assert_eq!(session.id(), 2);
    drop(session);
    assert_eq!(server.stats().handshakes, 2);
    assert!(eventually(Duration::from_secs(2), || server.stats().disconnects == 1).await);
}

#[tokio::test]
async fn test_dropped_result_stream_discards_session() {
    let server = MockServer::builder().block_size(10).start().await.unwrap();
    let client = client(&server, |o| o);

    let mut rows = client
        .query("SELECT number FROM numbers(1000)", &[])
        .await
        .unwrap();
    rows.next().await.unwrap().unwrap();
    drop(rows);

    assert_eq!(client.status().in_use, 0);
    assert_eq!(client.status().idle, 0);
    assert_eq!(client.metrics().discarded_unhealthy, 1);
    client.ping().await.unwrap();
    assert_eq!(client.metrics().connections_created, 2);
}

#[tokio::test]
async fn test_cancelled_operation_discards_session() {
    let server = MockServer::start().await.unwrap();
    let client = client(&server, |o| o);

    let cancelled =
        tokio::time::timeout(Duration::from_millis(200), client.exec("SELECT sleep(5)", &[])).await;
    assert!(cancelled.is_err());

    assert_eq!(client.status().in_use, 0);
    assert_eq!(client.status().idle, 0);
    assert_eq!(client.metrics().discarded_unhealthy, 1);
}

#[tokio::test]
async fn test_failover_to_third_address() {
    init_tracing();
    let server = MockServer::start().await.unwrap();
    let bad1 = unused_addr().unwrap();
    let bad2 = unused_addr().unwrap();
    let client = Client::open(
        Options::new(bad1)
            .addr(bad2)
            .addr(server.addr())
            .open_strategy(OpenStrategy::InOrder),
    )
    .unwrap();

    client.ping().await.unwrap();
    let session = client.acquire().await.unwrap();
    assert_eq!(session.address(), server.addr());
    assert_eq!(client.metrics().connect_failures, 2);
    assert_eq!(client.metrics().connections_created, 1);
}

#[tokio::test]
async fn test_failover_exhausted_returns_last_error() {
    let bad1 = unused_addr().unwrap();
    let bad2 = unused_addr().unwrap();
    let client = Client::open(Options::new(bad1).addr(bad2.clone())).unwrap();

    match client.ping().await {
        Err(Error::Dial { addr, source }) => {
            assert_eq!(addr, bad2);
            assert!(matches!(*source, Error::Io(_)), "{source:?}");
        }
        other => panic!("expected dial error, got {other:?}"),
    }
    assert_eq!(client.status().in_use, 0);
}

#[tokio::test]
async fn test_dial_error_carries_server_exception() {
    let server = MockServer::builder()
        .credentials("app", "secret")
        .start()
        .await
        .unwrap();
    let client = client(&server, |o| o.auth("default", "app", "nope"));

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, Error::Dial { .. }), "{err:?}");
    assert_eq!(err.server_code(), Some(codes::AUTHENTICATION_FAILED));
}

#[tokio::test]
async fn test_acquire_blocks_then_times_out() {
    let server = MockServer::start().await.unwrap();
    let client = client(&server, |o| {
        o.max_open_conns(1)
            .max_idle_conns(1)
            .acquire_timeout(Duration::from_millis(100))
    });

    let held = client.acquire().await.unwrap();
    let started = tokio::time::Instant::now();
    match client.acquire().await {
        Err(Error::PoolExhausted { timeout }) => assert_eq!(timeout, Duration::from_millis(100)),
        other => panic!("expected pool exhaustion, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_millis(100));
    drop(held);

    client.ping().await.unwrap();
    assert_eq!(client.metrics().connections_created, 1);
}

#[tokio::test]
async fn test_acquire_unblocks_on_release() {
    let server = MockServer::start().await.unwrap();
    let client = client(&server, |o| {
        o.max_open_conns(1)
            .max_idle_conns(1)
            .acquire_timeout(Duration::from_secs(2))
    });

    let held = client.acquire().await.unwrap();
    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.ping().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    drop(held);
    waiter.await.unwrap().unwrap();
    assert_eq!(client.metrics().checkouts_reused, 1);
}

#[tokio::test]
async fn test_concurrent_clients_respect_bounds() {
    let server = MockServer::builder().block_size(5).start().await.unwrap();
    let client = client(&server, |o| {
        o.max_open_conns(4)
            .max_idle_conns(2)
            .acquire_timeout(Duration::from_secs(5))
    });
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let client = client.clone();
        let peak = Arc::clone(&peak);
        tasks.push(tokio::spawn(async move {
            for _ in 0..5 {
                let rows = client
                    .query("SELECT number FROM numbers(20)", &[])
                    .await
                    .unwrap();
                let status = client.status();
                assert!(status.in_use <= 4);
                assert!(status.idle <= 2);
                peak.fetch_max(status.in_use, Ordering::SeqCst);
                assert_eq!(rows.fetch_all().await.unwrap().len(), 20);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 4);
    let status = client.status();
    assert_eq!(status.in_use, 0);
    assert!(status.idle <= 2);
    assert!(eventually(Duration::from_secs(2), || server.stats().open_connections() <= 2).await);
    assert_eq!(client.metrics().checkouts_successful, 80);
}

#[tokio::test]
async fn test_expired_session_is_closed_on_release() {
    let server = MockServer::start().await.unwrap();
    let client = client(&server, |o| o.conn_max_lifetime(Duration::from_millis(50)));

    let session = client.acquire().await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    drop(session);

    assert_eq!(client.status().idle, 0);
    assert_eq!(client.metrics().discarded_expired, 1);
    assert!(eventually(Duration::from_secs(2), || server.stats().disconnects == 1).await);
}

#[tokio::test]
async fn test_close_drains_idle_and_rejects_operations() {
    let server = MockServer::start().await.unwrap();
    let client = client(&server, |o| o);

    client.ping().await.unwrap();
    assert_eq!(client.status().idle, 1);

    client.close();
    assert_eq!(client.status().idle, 0);
    assert!(matches!(client.ping().await, Err(Error::PoolClosed)));
    assert!(eventually(Duration::from_secs(2), || server.stats().disconnects == 1).await);
}

#[tokio::test]
async fn test_independent_clients_have_independent_pools() {
    let server = MockServer::start().await.unwrap();
    let a = client(&server, |o| o);
    let b = client(&server, |o| o);

    a.ping().await.unwrap();
    b.ping().await.unwrap();
    a.close();

    b.ping().await.unwrap();
    assert_eq!(server.stats().handshakes, 2);
    assert_eq!(b.metrics().checkouts_reused, 1);
}

#[tokio::test]
async fn test_dsn_options_reach_the_server() {
    let server = MockServer::start().await.unwrap();
    let dsn = format!(
        "clickhouse://default@{}/default?compress=TRUE&debug=on&max_execution_time=60",
        server.addr()
    );
    let client = Client::open_dsn(&dsn).unwrap();
    assert_eq!(client.options().compression, Some(CompressionMethod::Lz4));
    assert!(client.options().debug);

    let rows = client
        .query("SELECT number FROM numbers(3)", &[])
        .await
        .unwrap()
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);

    let received = server.last_query().unwrap();
    assert_eq!(received.compression, CompressionMethod::Lz4);
    assert_eq!(
        received.settings,
        vec![("max_execution_time".to_string(), "60".to_string())]
    );
}

#[tokio::test]
async fn test_server_version() {
    let server = MockServer::builder()
        .display_name("replica-2")
        .start()
        .await
        .unwrap();
    let client = client(&server, |o| o);

    let version = client.server_version().await.unwrap();
    assert_eq!(version.display_name, "replica-2");
    assert_eq!(version.name, "ClickHouse");
    tokio_test::assert_ok!(client.ping().await);
}
