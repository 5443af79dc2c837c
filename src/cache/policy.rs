//! Which upstream responses may be cached, and for how long.
//!
//! # Design Decisions
//! - Only `200` answers to `GET` are stored
//! - `Cache-Control: max-age=N` overrides the configured default TTL
//! - Every TTL is capped at `MAX_TTL`
//! - `no-store` and `private` opt a response out entirely

use std::time::Duration;

use crate::cache::store::MAX_TTL;
use crate::http::{Request, Response};

#[derive(Debug, Clone)]
pub struct CachePolicy {
    default_ttl: Duration,
}

impl CachePolicy {
    pub fn new(default_ttl: Duration) -> Self {
        Self { default_ttl }
    }

    /// TTL to store `response` under, or `None` if it must not be cached.
    pub fn ttl_for(&self, request: &Request, response: &Response) -> Option<Duration> {
        if !request.method.eq_ignore_ascii_case("GET") || response.status != 200 {
            return None;
        }

        let mut max_age = None;
        for directive in response
            .headers
            .get_all("cache-control")
            .flat_map(|v| v.split(','))
            .map(str::trim)
        {
            if directive.eq_ignore_ascii_case("no-store") || directive.eq_ignore_ascii_case("private") {
                return None;
            }
            if let Some((name, value)) = directive.split_once('=') {
                if name.trim().eq_ignore_ascii_case("max-age") {
                    max_age = value.trim().trim_matches('"').parse::<u64>().ok();
                }
            }
        }

        Some(max_age.map(Duration::from_secs).unwrap_or(self.default_ttl).min(MAX_TTL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CachePolicy {
        CachePolicy::new(Duration::from_secs(60))
    }

    fn ok(cache_control: Option<&str>) -> Response {
        let mut resp = Response::new(200, "OK").with_body("OK");
        if let Some(cc) = cache_control {
            resp.headers.append("Cache-Control", cc);
        }
        resp
    }

    #[test]
    fn get_200_uses_default_ttl() {
        let req = Request::new("GET", "/a", "HTTP/1.1");
        assert_eq!(policy().ttl_for(&req, &ok(None)), Some(Duration::from_secs(60)));
    }

    #[test]
    fn max_age_hint_wins() {
        let req = Request::new("GET", "/a", "HTTP/1.1");
        assert_eq!(
            policy().ttl_for(&req, &ok(Some("public, max-age=5"))),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn non_get_or_non_200_is_not_cached() {
        let post = Request::new("POST", "/a", "HTTP/1.1");
        assert_eq!(policy().ttl_for(&post, &ok(None)), None);

        let get = Request::new("GET", "/a", "HTTP/1.1");
        let not_found = Response::new(404, "Not Found").with_body("");
        assert_eq!(policy().ttl_for(&get, &not_found), None);
    }

    #[test]
    fn no_store_opts_out() {
        let req = Request::new("GET", "/a", "HTTP/1.1");
        assert_eq!(policy().ttl_for(&req, &ok(Some("no-store"))), None);
        assert_eq!(policy().ttl_for(&req, &ok(Some("max-age=30, private"))), None);
    }

    #[test]
    fn oversized_max_age_is_capped() {
        let req = Request::new("GET", "/a", "HTTP/1.1");
        assert_eq!(
            policy().ttl_for(&req, &ok(Some("max-age=18446744073709551615"))),
            Some(MAX_TTL)
        );
        // beyond u64: unparseable, so the default applies
        assert_eq!(
            policy().ttl_for(&req, &ok(Some("max-age=99999999999999999999999"))),
            Some(Duration::from_secs(60))
        );
    }
}
