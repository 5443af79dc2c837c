//! Parsed client request.
//!
//! # Responsibilities
//! - Hold the start line, headers and body of one request
//! - Derive per-request flags (keep-alive, gzip acceptance)
//! - Carry the client address used for `X-Forwarded-For`

use std::net::IpAddr;

use crate::http::headers::Headers;

/// A complete HTTP/1.x request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Address of the client this request arrived from, if known.
    pub client_addr: Option<IpAddr>,
}

impl Request {
    pub fn new(method: impl Into<String>, target: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            version: version.into(),
            headers: Headers::new(),
            body: Vec::new(),
            client_addr: None,
        }
    }

    /// Whether the client wants the connection reused after this cycle.
    pub fn keep_alive(&self) -> bool {
        keep_alive(&self.version, &self.headers)
    }

    /// Whether the client advertised gzip in `Accept-Encoding`.
    pub fn accepts_compression(&self) -> bool {
        self.headers
            .get_all("accept-encoding")
            .flat_map(|v| v.split(','))
            .any(|coding| {
                let mut parts = coding.split(';');
                let name = parts.next().unwrap_or("").trim();
                name.eq_ignore_ascii_case("gzip") && !parts.any(|p| is_zero_qvalue(p.trim()))
            })
    }

    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }
}

/// Connection persistence rule shared by requests and responses.
///
/// An explicit `close` wins over `keep-alive`; with neither present,
/// HTTP/1.1 persists and anything older does not.
pub(crate) fn keep_alive(version: &str, headers: &Headers) -> bool {
    if headers.has_token("connection", "close") {
        false
    } else if headers.has_token("connection", "keep-alive") {
        true
    } else {
        version.eq_ignore_ascii_case("HTTP/1.1")
    }
}

fn is_zero_qvalue(param: &str) -> bool {
    match param.split_once('=') {
        Some((k, v)) if k.trim().eq_ignore_ascii_case("q") => {
            v.trim().parse::<f32>().map(|q| q == 0.0).unwrap_or(false)
        }
        _ => false,
    }
}
