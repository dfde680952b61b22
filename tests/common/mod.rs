//! Shared loopback fixtures for tunnel integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tunnelpool::config::ServerConfig;
use tunnelpool::models::{ProxyCandidate, ServerStats};
use tunnelpool::proxy::request::{read_head, MAX_REQUEST_HEAD};
use tunnelpool::proxy::{ProxySelector, TunnelServer};
use tunnelpool::services::ServiceHandle;

pub const ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Selector that always returns the same candidate (or none)
pub struct FixedSelector(pub Option<ProxyCandidate>);

impl ProxySelector for FixedSelector {
    fn select(&self) -> Option<ProxyCandidate> {
        self.0.clone()
    }
}

/// A running tunnel server on an ephemeral loopback port
pub struct TestServer {
    pub addr: SocketAddr,
    pub stats: Arc<ServerStats>,
    handle: ServiceHandle,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(selector: Arc<dyn ProxySelector>) -> Self {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            connect_timeout: 1,
            upstream_timeout: 2,
            ..ServerConfig::default()
        };
        let stats = Arc::new(ServerStats::new());
        let server = TunnelServer::new(config, selector, stats.clone());
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (handle, shutdown) = ServiceHandle::new();
        let task = tokio::spawn(async move {
            server.serve(listener, shutdown).await.unwrap();
        });

        Self {
            addr,
            stats,
            handle,
            task,
        }
    }

    pub async fn stop(self) {
        self.handle.shutdown();
        self.task.await.unwrap();
    }
}

/// Echo server; every accepted connection is reported on the returned channel
pub async fn start_echo_server() -> (SocketAddr, mpsc::UnboundedReceiver<SocketAddr>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, peer)) = listener.accept().await {
            let _ = tx.send(peer);
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    (addr, rx)
}

/// Upstream HTTP proxy that accepts any CONNECT, records the request line, then echoes
pub async fn start_fake_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let head = read_head(&mut socket, MAX_REQUEST_HEAD, None).await.unwrap();
                let text = String::from_utf8_lossy(&head.head).to_string();
                let _ = tx.send(text.lines().next().unwrap_or("").to_string());

                socket
                    .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                    .await
                    .unwrap();
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    (addr, rx)
}

/// Send a CONNECT and return the stream once the full 200 reply has been read
pub async fn open_tunnel(proxy: SocketAddr, target: &str) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n", target, target);
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut reply = vec![0u8; ESTABLISHED.len()];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, ESTABLISHED);
    stream
}

/// A loopback port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
