//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use caching_proxy::config::ProxyConfig;
use caching_proxy::http::{parse_request, parse_response, ParseResult, Request, Response};
use caching_proxy::net::Listener;
use caching_proxy::{ProxyServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A mock upstream that answers one request per connection and counts connections.
pub struct MockUpstream {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl MockUpstream {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Start a mock upstream whose reply is computed from the parsed request.
pub async fn start_upstream<F>(respond: F) -> MockUpstream
where
    F: Fn(&Request) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let respond = Arc::new(respond);

    let counter = Arc::clone(&connections);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let respond = Arc::clone(&respond);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let request = loop {
                    if let ParseResult::Complete { message, .. } = parse_request(&buf) {
                        break message;
                    }
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                };
                let reply = respond(&request);
                let _ = socket.write_all(&reply).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    MockUpstream { addr, connections }
}

/// Start a mock upstream that always returns the same `200 OK` body.
pub async fn start_fixed_upstream(body: &'static str) -> MockUpstream {
    start_upstream(move |_| ok_response(body)).await
}

pub fn ok_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

/// A proxy running on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

/// Config pointing at `upstream`, listening on an ephemeral loopback port.
pub fn test_config(upstream: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.address = upstream.to_string();
    config.timeouts.shutdown_grace_secs = 1;
    config
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let listener = Listener::bind(&config.listener).unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server = ProxyServer::new(config);

    let handle = tokio::spawn(async move {
        server.run(listener, server_shutdown).await.unwrap();
    });

    TestProxy {
        addr,
        shutdown,
        handle,
    }
}

/// Read one complete response, or `None` if the proxy closed first.
pub async fn read_response(stream: &mut TcpStream) -> Option<Response> {
    read_response_with(stream, parse_response).await
}

/// Read one response framed by `parse` (e.g. `parse_response_head` after a HEAD).
pub async fn read_response_with(
    stream: &mut TcpStream,
    parse: fn(&[u8]) -> ParseResult<Response>,
) -> Option<Response> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match parse(&buf) {
            ParseResult::Complete { message, .. } => return Some(message),
            ParseResult::Invalid(e) => panic!("proxy sent an invalid response: {e}"),
            ParseResult::Incomplete => {}
        }
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .expect("timed out waiting for the proxy")
            .unwrap_or(0);
        if n == 0 {
            assert!(buf.is_empty(), "connection closed mid-response");
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Send raw bytes and read back one response.
pub async fn roundtrip(stream: &mut TcpStream, request: &[u8]) -> Option<Response> {
    stream.write_all(request).await.unwrap();
    read_response(stream).await
}

/// True once the peer has closed the connection without sending anything.
pub async fn closed_without_reply(stream: &mut TcpStream) -> bool {
    let mut chunk = [0u8; 64];
    match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk)).await {
        Ok(Ok(0)) | Ok(Err(_)) => true,
        Ok(Ok(_)) => false,
        Err(_) => panic!("connection still open"),
    }
}
