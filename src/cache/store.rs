//! TTL response store keyed by request fingerprint.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Longest freshness lifetime the cache will honour.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Fixed-length digest identifying a request for caching purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // a 12 hex-char prefix is plenty to correlate log lines
        f.write_str(&hex::encode(&self.0[..6]))
    }
}

/// Digest of `method ++ path ++ version`. Headers and body do not contribute.
pub fn fingerprint(method: &str, path: &str, version: &str) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(path.as_bytes());
    hasher.update(version.as_bytes());
    CacheKey(hasher.finalize().into())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: Bytes,
    expires_at: Instant,
}

/// Serialized responses with an absolute expiry each.
///
/// Stale entries are never evicted; they stay until overwritten and simply
/// fail the freshness check.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached bytes for `key` if present and `now` is not past the expiry.
    pub fn lookup(&self, key: &CacheKey, now: Instant) -> Option<Bytes> {
        self.entries
            .get(key)
            .filter(|entry| now <= entry.expires_at)
            .map(|entry| entry.response.clone())
    }

    /// Insert or overwrite the entry for `key`, fresh until `now + ttl`.
    ///
    /// `ttl` is clamped to [`MAX_TTL`].
    pub fn store(&mut self, key: CacheKey, response: Bytes, ttl: Duration, now: Instant) {
        let expires_at = now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now);
        self.entries.insert(key, CacheEntry { response, expires_at });
    }

    /// Number of entries held, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
