//! Incremental HTTP/1.x message framing.
//!
//! # Responsibilities
//! - Decide whether a byte buffer holds a complete request/response yet
//! - Parse start line and header section (httparse), then the `Content-Length` body
//! - Render messages back to wire bytes
//!
//! # Design Decisions
//! - No I/O: callers own the buffer and feed it again after every read
//! - A short buffer is never an error, only `Incomplete`
//! - `Content-Length` is the only framing; chunked bodies are rejected upstream
//!   by requiring the header on responses
//! - Bare `LF` line endings are accepted on input, output is always `CRLF`

use thiserror::Error;

use crate::http::headers::Headers;
use crate::http::request::Request;
use crate::http::response::Response;

/// Most header lines accepted in one message head.
pub const MAX_HEADERS: usize = 100;

/// Why a buffer can never become a valid message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed start line: {0}")]
    StartLine(httparse::Error),
    #[error("malformed header section: {0}")]
    Headers(httparse::Error),
    #[error("invalid content-length: {0:?}")]
    ContentLength(String),
    #[error("response carries no content-length")]
    MissingContentLength,
    #[error("header value is not valid UTF-8")]
    Encoding,
    #[error("message exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
}

impl From<httparse::Error> for ParseError {
    fn from(e: httparse::Error) -> Self {
        match e {
            httparse::Error::HeaderName | httparse::Error::HeaderValue | httparse::Error::TooManyHeaders => {
                ParseError::Headers(e)
            }
            _ => ParseError::StartLine(e),
        }
    }
}

/// Outcome of one parse attempt over the bytes received so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult<T> {
    /// More bytes are needed.
    Incomplete,
    /// The buffer can never form a valid message.
    Invalid(ParseError),
    /// A full message; `consumed` bytes of the buffer belong to it.
    Complete { message: T, consumed: usize },
}

impl<T> ParseResult<T> {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseResult::Incomplete)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ParseResult::Invalid(_))
    }
}

/// Parse one request from the front of `buf`.
pub fn parse_request(buf: &[u8]) -> ParseResult<Request> {
    parse_request_within(buf, usize::MAX)
}

/// Like [`parse_request`], but a request whose head and declared body together
/// exceed `limit` bytes is `Invalid` as soon as that is known.
pub fn parse_request_within(buf: &[u8], limit: usize) -> ParseResult<Request> {
    let too_large = ParseResult::Invalid(ParseError::TooLarge { limit });

    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut slots);
    let body_start = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) if buf.len() > limit => return too_large,
        Ok(httparse::Status::Partial) => return ParseResult::Incomplete,
        Err(e) => return ParseResult::Invalid(e.into()),
    };
    let (Some(method), Some(target), Some(version)) = (req.method, req.path, req.version) else {
        return ParseResult::Invalid(ParseError::StartLine(httparse::Error::Token));
    };
    let headers = match collect_headers(req.headers) {
        Ok(h) => h,
        Err(e) => return ParseResult::Invalid(e),
    };
    let body_len = match content_length(&headers) {
        Ok(len) => len.unwrap_or(0),
        Err(e) => return ParseResult::Invalid(e),
    };
    if body_start.saturating_add(body_len) > limit {
        return too_large;
    }

    let Some((body, consumed)) = take_body(buf, body_start, body_len) else {
        return ParseResult::Incomplete;
    };

    ParseResult::Complete {
        message: Request {
            method: method.to_string(),
            target: target.to_string(),
            version: version_str(version).to_string(),
            headers,
            body,
            client_addr: None,
        },
        consumed,
    }
}

/// Parse one response from the front of `buf`. `Content-Length` is mandatory.
pub fn parse_response(buf: &[u8]) -> ParseResult<Response> {
    parse_response_inner(buf, true)
}

/// Parse a response to a `HEAD` request: the head alone completes it, whatever
/// `Content-Length` announces.
pub fn parse_response_head(buf: &[u8]) -> ParseResult<Response> {
    parse_response_inner(buf, false)
}

fn parse_response_inner(buf: &[u8], expect_body: bool) -> ParseResult<Response> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut res = httparse::Response::new(&mut slots);
    let body_start = match res.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return ParseResult::Incomplete,
        Err(e) => return ParseResult::Invalid(e.into()),
    };
    let (Some(version), Some(status)) = (res.version, res.code) else {
        return ParseResult::Invalid(ParseError::StartLine(httparse::Error::Status));
    };
    let reason = res.reason.unwrap_or("").trim();
    let headers = match collect_headers(res.headers) {
        Ok(h) => h,
        Err(e) => return ParseResult::Invalid(e),
    };

    let body_len = if expect_body {
        match content_length(&headers) {
            Ok(Some(len)) => len,
            Ok(None) => return ParseResult::Invalid(ParseError::MissingContentLength),
            Err(e) => return ParseResult::Invalid(e),
        }
    } else {
        0
    };

    let Some((body, consumed)) = take_body(buf, body_start, body_len) else {
        return ParseResult::Incomplete;
    };

    ParseResult::Complete {
        message: Response {
            version: version_str(version).to_string(),
            status,
            reason: reason.to_string(),
            headers,
            body,
        },
        consumed,
    }
}

/// Render a request for the upstream, appending the client address to
/// `X-Forwarded-For` and this proxy to `Via`. The request itself is untouched.
pub fn serialize_request(req: &Request, via_name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + req.body.len());
    push_line(&mut out, &format!("{} {} {}", req.method, req.target, req.version));

    let mut forwarded_for: Option<String> = None;
    let mut via: Option<String> = None;
    for (name, value) in req.headers.iter() {
        if name.eq_ignore_ascii_case("x-forwarded-for") {
            forwarded_for = Some(join_list(forwarded_for, value));
        } else if name.eq_ignore_ascii_case("via") {
            via = Some(join_list(via, value));
        } else {
            push_header(&mut out, name, value, Some(req.body.len()));
        }
    }

    let client = req
        .client_addr
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    push_header(&mut out, "X-Forwarded-For", &join_list(forwarded_for, &client), None);
    push_header(&mut out, "Via", &join_list(via, &format!("1.1 {via_name}")), None);

    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&req.body);
    out
}

/// Render a response exactly as stored, with `Content-Length` kept in step
/// with the current body.
pub fn serialize_response(resp: &Response) -> Vec<u8> {
    let mut out = render_response_head(resp, Some(resp.body.len()));
    out.extend_from_slice(&resp.body);
    out
}

/// Render the answer to a `HEAD` request: headers as received, including the
/// upstream's declared `Content-Length`, and no body.
pub fn serialize_response_head(resp: &Response) -> Vec<u8> {
    render_response_head(resp, None)
}

fn render_response_head(resp: &Response, body_len: Option<usize>) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + resp.body.len());
    let status_line = if resp.reason.is_empty() {
        format!("{} {:03}", resp.version, resp.status)
    } else {
        format!("{} {:03} {}", resp.version, resp.status, resp.reason)
    };
    push_line(&mut out, &status_line);
    for (name, value) in resp.headers.iter() {
        push_header(&mut out, name, value, body_len);
    }
    out.extend_from_slice(b"\r\n");
    out
}

fn collect_headers(parsed: &[httparse::Header<'_>]) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();
    for header in parsed {
        let value = std::str::from_utf8(header.value).map_err(|_| ParseError::Encoding)?;
        headers.append(header.name, value.trim());
    }
    Ok(headers)
}

fn version_str(minor: u8) -> &'static str {
    if minor == 0 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    }
}

fn content_length(headers: &Headers) -> Result<Option<usize>, ParseError> {
    let mut found: Option<usize> = None;
    for raw in headers.get_all("content-length") {
        let value = raw.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::ContentLength(raw.to_string()));
        }
        let len = value
            .parse::<usize>()
            .map_err(|_| ParseError::ContentLength(raw.to_string()))?;
        match found {
            Some(prev) if prev != len => return Err(ParseError::ContentLength(raw.to_string())),
            _ => found = Some(len),
        }
    }
    Ok(found)
}

fn take_body(buf: &[u8], start: usize, len: usize) -> Option<(Vec<u8>, usize)> {
    let end = start.checked_add(len)?;
    if buf.len() < end {
        return None;
    }
    Some((buf[start..end].to_vec(), end))
}

fn join_list(existing: Option<String>, value: &str) -> String {
    match existing {
        Some(prev) => format!("{prev}, {value}"),
        None => value.to_string(),
    }
}

fn push_line(out: &mut Vec<u8>, line: &str) {
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// `body_len` of `None` writes a `Content-Length` header verbatim.
fn push_header(out: &mut Vec<u8>, name: &str, value: &str, body_len: Option<usize>) {
    match body_len {
        Some(len) if name.eq_ignore_ascii_case("content-length") => {
            push_line(out, &format!("{name}: {len}"))
        }
        _ => push_line(out, &format!("{name}: {value}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    const POST: &[u8] = b"POST /submit HTTP/1.1\r\nHost: example.com\r\nContent-Length: 10\r\n\r\nheyabuddy!";

    fn complete<T>(result: ParseResult<T>) -> (T, usize) {
        match result {
            ParseResult::Complete { message, consumed } => (message, consumed),
            ParseResult::Incomplete => panic!("expected complete, got incomplete"),
            ParseResult::Invalid(e) => panic!("expected complete, got invalid: {e}"),
        }
    }

    #[test]
    fn parses_simple_get() {
        let (req, consumed) = complete(parse_request(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/a");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.headers.get("host"), Some("x"));
        assert!(req.body.is_empty());
        assert_eq!(consumed, 28);
    }

    #[test]
    fn empty_input_is_incomplete() {
        assert!(parse_request(b"").is_incomplete());
        assert!(parse_response(b"").is_incomplete());
    }

    #[test]
    fn every_prefix_is_incomplete() {
        for n in 0..POST.len() {
            let result = parse_request(&POST[..n]);
            assert!(result.is_incomplete(), "prefix of {n} bytes gave {result:?}");
        }
        let resp = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nX-A: b\r\n\r\nOK";
        for n in 0..resp.len() {
            assert!(parse_response(&resp[..n]).is_incomplete(), "prefix of {n} bytes");
        }
    }

    #[test]
    fn short_body_waits_for_declared_length() {
        let head = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n";
        let mut buf = head.to_vec();
        buf.extend_from_slice(b"12345678");
        assert!(parse_request(&buf).is_incomplete());

        buf.extend_from_slice(b"90");
        let (req, consumed) = complete(parse_request(&buf));
        assert_eq!(req.body, b"1234567890");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn trailing_bytes_are_not_consumed() {
        let mut buf = POST.to_vec();
        buf.extend_from_slice(b"GET /next HTTP/1.1\r\n");
        let (req, consumed) = complete(parse_request(&buf));
        assert_eq!(req.body, b"heyabuddy!");
        assert_eq!(consumed, POST.len());
    }

    #[test]
    fn header_value_keeps_later_colons() {
        let (req, _) = complete(parse_request(
            b"GET / HTTP/1.1\r\nX-Time:  12:30:45 \r\nHost: localhost:8080\r\n\r\n",
        ));
        assert_eq!(req.headers.get("x-time"), Some("12:30:45"));
        assert_eq!(req.headers.get("host"), Some("localhost:8080"));
    }

    #[test]
    fn bare_lf_line_endings_are_accepted() {
        let (req, _) = complete(parse_request(b"GET / HTTP/1.0\nHost: example.com\n\n"));
        assert_eq!(req.version, "HTTP/1.0");
        assert!(!req.keep_alive());
    }

    #[test]
    fn malformed_start_lines_are_invalid() {
        for bad in [
            &b"GARBAGE\r\n\r\n"[..],
            b"GET /\r\n\r\n",
            b"GET / HTTP/1.1 extra\r\n\r\n",
            b"GET / FTP/1.1\r\n\r\n",
            b"G(T / HTTP/1.1\r\n\r\n",
        ] {
            assert!(parse_request(bad).is_invalid(), "{:?}", String::from_utf8_lossy(bad));
        }
    }

    #[test]
    fn bad_start_line_fails_before_headers_finish() {
        assert!(parse_request(b"NOT AN HTTP REQUEST\r\nHost: x\r\n").is_invalid());
    }

    #[test]
    fn header_without_colon_is_invalid() {
        assert!(matches!(
            parse_request(b"GET / HTTP/1.1\r\nHost x\r\n\r\n"),
            ParseResult::Invalid(ParseError::Headers(_))
        ));
        assert!(parse_request(b"GET / HTTP/1.1\r\n: empty\r\n\r\n").is_invalid());
    }

    #[test]
    fn bad_content_length_is_invalid() {
        assert_eq!(
            parse_request(b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n"),
            ParseResult::Invalid(ParseError::ContentLength("ten".into()))
        );
        assert!(parse_request(b"POST / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\nab")
            .is_invalid());
    }

    #[test]
    fn response_requires_content_length() {
        assert_eq!(
            parse_response(b"HTTP/1.1 200 OK\r\nServer: x\r\n\r\n"),
            ParseResult::Invalid(ParseError::MissingContentLength)
        );
    }

    #[test]
    fn parses_response_with_multiword_reason() {
        let (resp, consumed) =
            complete(parse_response(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n"));
        assert_eq!(resp.status, 404);
        assert_eq!(resp.reason, "Not Found");
        assert_eq!(consumed, 45);
    }

    #[test]
    fn head_response_ignores_declared_body() {
        let (resp, _) = complete(parse_response_head(
            b"HTTP/1.1 200 OK\r\nContent-Length: 500\r\n\r\n",
        ));
        assert!(resp.body.is_empty());
        assert_eq!(resp.headers.get("content-length"), Some("500"));
    }

    #[test]
    fn bad_status_line_is_invalid() {
        assert!(parse_response(b"HTTP/1.1 20 OK\r\nContent-Length: 0\r\n\r\n").is_invalid());
        assert!(parse_response(b"HTTX/1.1 200 OK\r\n").is_invalid());
    }

    #[test]
    fn request_round_trips_apart_from_proxy_headers() {
        let (original, _) = complete(parse_request(POST));
        let mut with_client = original.clone();
        with_client.client_addr = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));

        let wire = serialize_request(&with_client, "caching-proxy");
        let (mut reparsed, consumed) = complete(parse_request(&wire));
        assert_eq!(consumed, wire.len());
        assert_eq!(reparsed.headers.get("x-forwarded-for"), Some("10.0.0.7"));
        assert_eq!(reparsed.headers.get("via"), Some("1.1 caching-proxy"));

        reparsed.headers.remove("x-forwarded-for");
        reparsed.headers.remove("via");
        assert_eq!(reparsed, original);
    }

    #[test]
    fn forwarding_headers_extend_existing_chain() {
        let (mut req, _) = complete(parse_request(
            b"GET / HTTP/1.1\r\nX-Forwarded-For: 1.2.3.4\r\nVia: 1.0 edge\r\n\r\n",
        ));
        req.client_addr = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let wire = String::from_utf8(serialize_request(&req, "p")).unwrap();
        assert!(wire.contains("X-Forwarded-For: 1.2.3.4, 127.0.0.1\r\n"));
        assert!(wire.contains("Via: 1.0 edge, 1.1 p\r\n"));
        assert_eq!(req.headers.get("via"), Some("1.0 edge"));
    }

    #[test]
    fn response_serialization_tracks_body_length() {
        let mut resp = Response::new(200, "OK").with_body("hello");
        resp.body = b"hi".to_vec();
        let wire = serialize_response(&resp);
        assert_eq!(wire, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi");
    }

    #[test]
    fn head_serialization_keeps_declared_length() {
        let (resp, _) = complete(parse_response_head(
            b"HTTP/1.1 200 OK\r\nContent-Length: 500\r\nVia: 1.1 up\r\n\r\n",
        ));
        let wire = serialize_response_head(&resp);
        assert_eq!(wire, b"HTTP/1.1 200 OK\r\nContent-Length: 500\r\nVia: 1.1 up\r\n\r\n");
    }

    #[test]
    fn declared_body_over_limit_fails_once_head_is_known() {
        let head = b"POST / HTTP/1.1\r\nContent-Length: 5000\r\n\r\n";
        assert_eq!(
            parse_request_within(head, 1024),
            ParseResult::Invalid(ParseError::TooLarge { limit: 1024 })
        );
        assert!(parse_request_within(head, 8192).is_incomplete());
    }

    #[test]
    fn unfinished_head_over_limit_is_too_large() {
        let mut buf = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        buf.extend(std::iter::repeat(b'a').take(64));
        assert_eq!(
            parse_request_within(&buf, 32),
            ParseResult::Invalid(ParseError::TooLarge { limit: 32 })
        );
        assert!(parse_request(&buf).is_incomplete());
    }

    #[test]
    fn too_many_headers_is_invalid() {
        let mut buf = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..=MAX_HEADERS {
            buf.extend_from_slice(format!("X-H{i}: v\r\n").as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        assert_eq!(
            parse_request(&buf),
            ParseResult::Invalid(ParseError::Headers(httparse::Error::TooManyHeaders))
        );
    }

    #[test]
    fn non_utf8_header_value_is_invalid() {
        assert_eq!(
            parse_request(b"GET / HTTP/1.1\r\nX-Bin: \xff\xfe\r\n\r\n"),
            ParseResult::Invalid(ParseError::Encoding)
        );
    }
}
