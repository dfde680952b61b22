//! End-to-end tunnel tests over loopback.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tunnelpool::models::ProxyCandidate;

mod common;

use common::{FixedSelector, TestServer};

#[tokio::test]
async fn test_connect_echo() {
    let (target, mut accepted) = common::start_echo_server().await;
    let server = TestServer::start(Arc::new(FixedSelector(None))).await;

    let mut tunnel = common::open_tunnel(server.addr, &target.to_string()).await;
    assert!(accepted.recv().await.is_some());

    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    tunnel.write_all(&payload).await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    tunnel.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);

    tunnel.shutdown().await.unwrap();
    let mut rest = Vec::new();
    tunnel.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    // Relay counters settle once both directions have stopped.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = server.stats.snapshot();
    assert_eq!(stats.bytes_transferred, 20_000);
    assert_eq!(stats.tunnels_established, 1);
    assert_eq!(stats.chained_tunnels, 0);
    assert_eq!(stats.active_connections, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_get_is_rejected_without_outbound_connection() {
    let (upstream, mut upstream_requests) = common::start_fake_upstream().await;
    let selector = FixedSelector(Some(ProxyCandidate::new(upstream.to_string())));
    let server = TestServer::start(Arc::new(selector)).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    assert_eq!(
        reply,
        b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n"
    );

    assert!(upstream_requests.try_recv().is_err());
    assert_eq!(server.stats.snapshot().rejected_requests, 1);

    server.stop().await;
}

#[tokio::test]
async fn test_chained_fallback_when_direct_fails() {
    let (upstream, mut upstream_requests) = common::start_fake_upstream().await;
    let selector = FixedSelector(Some(ProxyCandidate::new(upstream.to_string())));
    let server = TestServer::start(Arc::new(selector)).await;

    let target = format!("127.0.0.1:{}", common::closed_port().await);
    let mut tunnel = common::open_tunnel(server.addr, &target).await;

    assert_eq!(
        upstream_requests.recv().await.unwrap(),
        format!("CONNECT {} HTTP/1.1", target)
    );

    tunnel.write_all(b"through the chain").await.unwrap();
    let mut echoed = [0u8; 17];
    tunnel.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"through the chain");

    drop(tunnel);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = server.stats.snapshot();
    assert_eq!(stats.chained_tunnels, 1);

    server.stop().await;
}

#[tokio::test]
async fn test_no_upstream_available_is_bad_gateway() {
    let server = TestServer::start(Arc::new(FixedSelector(None))).await;
    let target = format!("127.0.0.1:{}", common::closed_port().await);

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    let request = format!("CONNECT {} HTTP/1.1\r\n\r\n", target);
    client.write_all(request.as_bytes()).await.unwrap();

    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, b"HTTP/1.1 502 Bad Gateway\r\nConnection: close\r\n\r\n");

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_connections_are_isolated() {
    const CONNECTIONS: usize = 50;

    let server = TestServer::start(Arc::new(FixedSelector(None))).await;

    let mut targets = Vec::with_capacity(CONNECTIONS);
    for _ in 0..CONNECTIONS {
        targets.push(common::start_echo_server().await.0);
    }

    let mut tasks = Vec::with_capacity(CONNECTIONS);
    for (i, target) in targets.into_iter().enumerate() {
        let proxy = server.addr;
        tasks.push(tokio::spawn(async move {
            let mut tunnel = common::open_tunnel(proxy, &target.to_string()).await;
            let payload = format!("connection-{}-payload", i).into_bytes();

            tunnel.write_all(&payload).await.unwrap();
            let mut echoed = vec![0u8; payload.len()];
            tunnel.read_exact(&mut echoed).await.unwrap();
            assert_eq!(echoed, payload);
        }));
    }

    let results = tokio::time::timeout(Duration::from_secs(10), futures::future::join_all(tasks))
        .await
        .expect("concurrent tunnels timed out");
    for result in results {
        result.unwrap();
    }

    assert_eq!(server.stats.snapshot().tunnels_established, CONNECTIONS as u64);

    server.stop().await;
}
