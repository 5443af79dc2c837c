//! Single-owner cache task.
//!
//! Connection tasks never touch `ResponseCache` directly. They talk to one
//! actor over a channel, which applies commands in arrival order; two stores
//! racing on one key therefore resolve last-writer-wins.

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::cache::store::{CacheKey, ResponseCache};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache actor is no longer running")]
    Unavailable,
}

enum CacheCommand {
    Lookup {
        key: CacheKey,
        reply: oneshot::Sender<Option<Bytes>>,
    },
    Store {
        key: CacheKey,
        response: Bytes,
        ttl: Duration,
    },
}

/// Cloneable handle to the cache actor.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    tx: mpsc::Sender<CacheCommand>,
}

impl CacheHandle {
    /// Spawn the actor on the current runtime. It stops once every handle is dropped.
    pub fn spawn(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run(ResponseCache::new(), rx));
        Self { tx }
    }

    /// Fresh cached bytes for `key`, judged at the moment the actor handles it.
    pub async fn lookup(&self, key: CacheKey) -> Result<Option<Bytes>, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CacheCommand::Lookup { key, reply })
            .await
            .map_err(|_| CacheError::Unavailable)?;
        rx.await.map_err(|_| CacheError::Unavailable)
    }

    /// Queue a store; expiry is computed from the time the actor applies it.
    pub async fn store(&self, key: CacheKey, response: Bytes, ttl: Duration) -> Result<(), CacheError> {
        self.tx
            .send(CacheCommand::Store { key, response, ttl })
            .await
            .map_err(|_| CacheError::Unavailable)
    }
}

async fn run(mut cache: ResponseCache, mut rx: mpsc::Receiver<CacheCommand>) {
    tracing::debug!("Cache actor started");
    while let Some(command) = rx.recv().await {
        match command {
            CacheCommand::Lookup { key, reply } => {
                let _ = reply.send(cache.lookup(&key, now()));
            }
            CacheCommand::Store { key, response, ttl } => {
                tracing::debug!(cache_key = %key, ttl_secs = ttl.as_secs(), bytes = response.len(), "Caching response");
                cache.store(key, response, ttl, now());
                metrics::record_cache_store(cache.len());
            }
        }
    }
    tracing::debug!(entries = cache.len(), "Cache actor stopped");
}

// tokio's clock, so paused-time tests can drive expiry
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
