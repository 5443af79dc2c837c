//! One-shot request forwarding to the configured upstream.

use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ProxyConfig;
use crate::http::codec::{parse_response, parse_response_head, serialize_request, ParseError, ParseResult};
use crate::http::{Request, Response};
use crate::observability::metrics;

/// Why a forward did not produce a response.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to connect to upstream {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out connecting to upstream {address}")]
    ConnectTimeout { address: String },
    #[error("upstream I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("upstream closed the connection after {received} bytes, before a complete response")]
    PrematureClose { received: usize },
    #[error("upstream sent an invalid response: {0}")]
    Parse(#[source] ParseError),
    #[error("upstream response exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
}

impl UpstreamError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Connect { .. } => "connect",
            UpstreamError::ConnectTimeout { .. } => "connect_timeout",
            UpstreamError::Io(_) => "io",
            UpstreamError::PrematureClose { .. } => "premature_close",
            UpstreamError::Parse(_) => "parse",
            UpstreamError::TooLarge { .. } => "too_large",
        }
    }
}

/// Sends requests to the fixed upstream, one fresh connection per call.
#[derive(Debug, Clone)]
pub struct UpstreamForwarder {
    address: String,
    via_name: String,
    connect_timeout: Duration,
    max_response_bytes: usize,
}

impl UpstreamForwarder {
    pub fn new(
        address: impl Into<String>,
        via_name: impl Into<String>,
        connect_timeout: Duration,
        max_response_bytes: usize,
    ) -> Self {
        Self {
            address: address.into(),
            via_name: via_name.into(),
            connect_timeout,
            max_response_bytes,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            config.upstream.address.clone(),
            config.proxy.via_name.clone(),
            Duration::from_secs(config.upstream.connect_timeout_secs),
            config.limits.max_response_bytes,
        )
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send `request` and read until a complete response is framed.
    ///
    /// The upstream connection is closed afterwards regardless of what either
    /// side asked for. Only connection establishment is time-bounded.
    pub async fn forward(&self, request: &Request) -> Result<Response, UpstreamError> {
        let mut stream = self.connect().await?;

        let wire = serialize_request(request, &self.via_name);
        stream.write_all(&wire).await?;
        stream.flush().await?;
        tracing::trace!(bytes = wire.len(), upstream = %self.address, "Request sent upstream");

        let parse: fn(&[u8]) -> ParseResult<Response> = if request.is_head() {
            parse_response_head
        } else {
            parse_response
        };

        let mut buffer = BytesMut::with_capacity(8192);
        let response = loop {
            let read = stream.read_buf(&mut buffer).await?;

            match parse(&buffer[..]) {
                ParseResult::Complete { message, .. } => break message,
                ParseResult::Invalid(e) => {
                    metrics::record_parse_error("response");
                    return Err(UpstreamError::Parse(e));
                }
                ParseResult::Incomplete if read == 0 => {
                    return Err(UpstreamError::PrematureClose {
                        received: buffer.len(),
                    })
                }
                ParseResult::Incomplete if buffer.len() > self.max_response_bytes => {
                    return Err(UpstreamError::TooLarge {
                        limit: self.max_response_bytes,
                    })
                }
                ParseResult::Incomplete => {}
            }
        };

        // best effort; the socket is dropped either way
        let _ = stream.shutdown().await;

        tracing::trace!(
            status = response.status,
            body_len = response.body.len(),
            upstream = %self.address,
            "Response received from upstream"
        );
        Ok(response)
    }

    async fn connect(&self) -> Result<TcpStream, UpstreamError> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(UpstreamError::Connect {
                address: self.address.clone(),
                source,
            }),
            Err(_) => Err(UpstreamError::ConnectTimeout {
                address: self.address.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn forwarder(addr: std::net::SocketAddr) -> UpstreamForwarder {
        UpstreamForwarder::new(addr.to_string(), "test-proxy", Duration::from_secs(1), 1024)
    }

    /// Accept one connection, capture the request head, reply with `reply` split
    /// into two writes.
    async fn one_shot_upstream(reply: &'static [u8]) -> (std::net::SocketAddr, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut chunk = [0u8; 1024];
            while !received.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&chunk[..n]);
            }
            let mid = reply.len() / 2;
            socket.write_all(&reply[..mid]).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            socket.write_all(&reply[mid..]).await.unwrap();
            received
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn forwards_and_reassembles_split_response() {
        let (addr, upstream) = one_shot_upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
        let mut req = Request::new("GET", "/x", "HTTP/1.1");
        req.client_addr = Some("10.1.1.1".parse().unwrap());

        let resp = forwarder(addr).forward(&req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hello");

        let seen = String::from_utf8(upstream.await.unwrap()).unwrap();
        assert!(seen.starts_with("GET /x HTTP/1.1\r\n"));
        assert!(seen.contains("X-Forwarded-For: 10.1.1.1\r\n"));
        assert!(seen.contains("Via: 1.1 test-proxy\r\n"));
    }

    #[tokio::test]
    async fn head_request_does_not_wait_for_body() {
        let (addr, _upstream) = one_shot_upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 99\r\n\r\n").await;
        let req = Request::new("HEAD", "/", "HTTP/1.1");
        let resp = forwarder(addr).forward(&req).await.unwrap();
        assert!(resp.body.is_empty());
    }

    #[tokio::test]
    async fn close_before_complete_is_premature() {
        let (addr, _upstream) = one_shot_upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc").await;
        let err = forwarder(addr)
            .forward(&Request::new("GET", "/", "HTTP/1.1"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::PrematureClose { .. }), "{err}");
    }

    #[tokio::test]
    async fn response_without_length_is_parse_error() {
        let (addr, _upstream) = one_shot_upstream(b"HTTP/1.1 200 OK\r\nServer: x\r\n\r\n").await;
        let err = forwarder(addr)
            .forward(&Request::new("GET", "/", "HTTP/1.1"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Parse(ParseError::MissingContentLength)));
        assert_eq!(err.kind(), "parse");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_connect_error() {
        // bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let err = forwarder(addr)
            .forward(&Request::new("GET", "/", "HTTP/1.1"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Connect { .. }));
    }
}
