//! Upstream response value and the header rewrites applied on the way back.
//!
//! # Responsibilities
//! - Hold the status line, headers and body of one response
//! - Derive keep-alive and content-encoding state
//! - Add the proxy attribution headers and the client-facing `Connection`

use crate::http::headers::Headers;
use crate::http::request;

/// A complete HTTP/1.x response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status,
            reason: reason.into(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Set the body and a matching `Content-Length`.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.headers.insert("Content-Length", self.body.len().to_string());
        self
    }

    pub fn keep_alive(&self) -> bool {
        request::keep_alive(&self.version, &self.headers)
    }

    /// True if the body currently carries a gzip content-coding.
    pub fn is_compressed(&self) -> bool {
        self.headers.has_token("content-encoding", "gzip")
    }

    /// Any content-coding at all, gzip or otherwise.
    pub fn has_content_encoding(&self) -> bool {
        self.headers
            .get_all("content-encoding")
            .any(|v| !v.trim().is_empty() && !v.trim().eq_ignore_ascii_case("identity"))
    }

    /// Stamp the proxy marker and the upstream that produced this response.
    pub fn add_proxy_headers(&mut self, via_name: &str, upstream: &str) {
        let via = match self.headers.get("via") {
            Some(existing) => format!("{existing}, 1.1 {via_name}"),
            None => format!("1.1 {via_name}"),
        };
        self.headers.insert("Via", via);
        self.headers.insert("X-Upstream", upstream);
    }

    /// Replace the hop-by-hop `Connection` header with the proxy's own decision.
    pub fn set_connection(&mut self, keep_alive: bool) {
        self.headers
            .insert("Connection", if keep_alive { "keep-alive" } else { "close" });
    }
}
