//! Proxy server: accept loop and per-connection request cycles.
//!
//! # Responsibilities
//! - Accept client connections and give each its own task
//! - Drive each connection's session: read, parse, serve, repeat
//! - Answer from the cache when a fresh entry exists
//! - Otherwise forward upstream, compress, cache, and reply
//! - Stop accepting on shutdown and drain open connections
//!
//! # Design Decisions
//! - Tokio's reactor is the readiness wait; a slow upstream only stalls the
//!   connection that is waiting on it
//! - Cycles on one connection are strictly sequential
//! - Any failure closes that connection only; nothing reaches the accept loop
//! - Upstream failures close the client without a synthesized 502

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::cache::{fingerprint, CacheHandle, CacheKey, CachePolicy};
use crate::config::{CompressionConfig, ProxyConfig};
use crate::http::codec::{parse_response, serialize_response, serialize_response_head, ParseResult};
use crate::http::compression::maybe_compress;
use crate::http::{Request, Response};
use crate::net::{ConnectionGuard, ConnectionSession, ConnectionTracker, Listener, ListenerError, Progress};
use crate::observability::metrics;
use crate::upstream::{UpstreamError, UpstreamForwarder};

/// Everything a connection task needs, shared read-only.
struct ProxyContext {
    forwarder: UpstreamForwarder,
    cache: Option<CacheHandle>,
    policy: CachePolicy,
    compression: CompressionConfig,
    idle_timeout: Duration,
    max_request_bytes: usize,
    via_name: String,
}

/// The caching reverse proxy.
pub struct ProxyServer {
    context: Arc<ProxyContext>,
    tracker: ConnectionTracker,
    shutdown_grace: Duration,
}

impl ProxyServer {
    /// Build the server and start the cache actor (if caching is enabled).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ProxyConfig) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| CacheHandle::spawn(config.cache.channel_capacity));

        let context = ProxyContext {
            forwarder: UpstreamForwarder::from_config(&config),
            cache,
            policy: CachePolicy::new(config.cache.default_ttl()),
            compression: config.compression.clone(),
            idle_timeout: Duration::from_secs(config.timeouts.idle_secs),
            max_request_bytes: config.limits.max_request_bytes,
            via_name: config.proxy.via_name.clone(),
        };

        Self {
            context: Arc::new(context),
            tracker: ConnectionTracker::new(),
            shutdown_grace: Duration::from_secs(config.timeouts.shutdown_grace_secs),
        }
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %addr,
            upstream = %self.context.forwarder.address(),
            cache_enabled = self.context.cache.is_some(),
            "Proxy server starting"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer, shutdown.resubscribe()),
                    Err(e) => tracing::warn!(error = %e, "Accept failed"),
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }
        drop(listener);

        let open = self.tracker.active_count();
        if open > 0 {
            tracing::info!(open_connections = open, "Draining connections");
            if !self.tracker.wait_for_drain(self.shutdown_grace).await {
                tracing::warn!(
                    open_connections = self.tracker.active_count(),
                    "Shutdown grace period elapsed with connections still open"
                );
            }
        }

        tracing::info!("Proxy server stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, shutdown: broadcast::Receiver<()>) {
        let guard = self.tracker.track();
        let span = tracing::info_span!("connection", connection_id = %guard.id(), peer_addr = %peer);
        let context = Arc::clone(&self.context);
        tokio::spawn(serve_connection(stream, peer, guard, context, shutdown).instrument(span));
    }
}

#[derive(Debug, Error)]
enum CycleError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("failed to write response: {0}")]
    Write(#[from] std::io::Error),
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    guard: ConnectionGuard,
    context: Arc<ProxyContext>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut session = ConnectionSession::new(guard.id(), peer, context.max_request_bytes);
    tracing::debug!("Session opened");

    while await_request(&mut stream, &mut session, context.idle_timeout, &mut shutdown).await {
        match run_cycle(&mut stream, &mut session, &context).await {
            Ok(true) => continue,
            Ok(false) => break,
            Err(CycleError::Upstream(e)) => {
                metrics::record_upstream_error(e.kind());
                tracing::warn!(error = %e, "Forwarding failed, closing client connection");
                session.close();
                break;
            }
            Err(e @ CycleError::Write(_)) => {
                tracing::debug!(error = %e, "Client went away mid-response");
                session.close();
                break;
            }
        }
    }

    let _ = stream.shutdown().await;
    tracing::debug!(cycles = session.cycles(), "Session closed");
    drop(guard);
}

enum Wake {
    Read(std::io::Result<usize>),
    Idle,
    Shutdown,
}

/// Read until the session holds a complete request.
///
/// The idle deadline restarts whenever bytes arrive. Returns false once the
/// session is closed: bad input, EOF, idle timeout or shutdown.
async fn await_request(
    stream: &mut TcpStream,
    session: &mut ConnectionSession,
    idle_timeout: Duration,
    shutdown: &mut broadcast::Receiver<()>,
) -> bool {
    let mut deadline = tokio::time::Instant::now() + idle_timeout;

    loop {
        match session.advance() {
            Progress::Ready => return true,
            Progress::Failed(e) => {
                metrics::record_parse_error("request");
                tracing::warn!(error = %e, "Invalid request, closing connection");
                return false;
            }
            Progress::NeedMore => {}
        }

        let wake = tokio::select! {
            read = tokio::time::timeout_at(deadline, stream.read_buf(session.read_buffer())) => match read {
                Ok(result) => Wake::Read(result),
                Err(_) => Wake::Idle,
            },
            _ = shutdown.recv() => Wake::Shutdown,
        };

        match wake {
            Wake::Read(Ok(0)) => {
                if session.buffered() > 0 {
                    tracing::debug!(buffered = session.buffered(), "Peer closed mid-request");
                } else {
                    tracing::trace!("Peer closed connection");
                }
                session.close();
                return false;
            }
            Wake::Read(Ok(n)) => {
                tracing::trace!(bytes = n, "Read from client");
                deadline = tokio::time::Instant::now() + idle_timeout;
            }
            Wake::Read(Err(e)) => {
                tracing::debug!(error = %e, "Client read failed");
                session.close();
                return false;
            }
            Wake::Idle => {
                tracing::debug!(idle_secs = idle_timeout.as_secs(), "Idle timeout, closing connection");
                session.close();
                return false;
            }
            Wake::Shutdown => {
                tracing::debug!("Closing idle connection for shutdown");
                session.close();
                return false;
            }
        }
    }
}

/// Serve the session's current request. Returns true if the connection stays open.
async fn run_cycle(
    stream: &mut TcpStream,
    session: &mut ConnectionSession,
    context: &ProxyContext,
) -> Result<bool, CycleError> {
    let started = Instant::now();
    let keep_alive = session.keep_alive();
    let Some(request) = session.request() else {
        return Ok(!session.is_closed());
    };
    let key = fingerprint(&request.method, &request.target, &request.version);
    let accepts_gzip = request.accepts_compression();
    let is_head = request.is_head();
    tracing::debug!(
        method = %request.method,
        path = %request.target,
        cache_key = %key,
        keep_alive,
        "Request received"
    );

    let (mut response, source) = match cached_response(context, key, accepts_gzip).await {
        Some(response) => {
            session.response_ready();
            (response, "cache")
        }
        None => {
            session.begin_forward();
            let Some(request) = session.request() else {
                return Ok(false);
            };
            let response = forward_and_store(request, context, key, accepts_gzip).await?;
            session.response_ready();
            (response, "upstream")
        }
    };

    response.set_connection(keep_alive);
    let wire = if is_head {
        serialize_response_head(&response)
    } else {
        serialize_response(&response)
    };
    stream.write_all(&wire).await?;
    stream.flush().await?;

    if let Some(request) = session.request() {
        tracing::info!(
            method = %request.method,
            path = %request.target,
            status = response.status,
            source,
            bytes = wire.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
    }
    metrics::record_request(source, response.status, started);

    Ok(session.finish_cycle())
}

/// A fresh cached response usable for this client, if any.
async fn cached_response(context: &ProxyContext, key: CacheKey, accepts_gzip: bool) -> Option<Response> {
    let cache = context.cache.as_ref()?;
    let bytes = match cache.lookup(key).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            metrics::record_cache_lookup("miss");
            return None;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cache lookup failed, treating as miss");
            return None;
        }
    };

    match parse_response(&bytes) {
        ParseResult::Complete { message, .. } if message.is_compressed() && !accepts_gzip => {
            metrics::record_cache_lookup("stale_encoding");
            tracing::debug!(cache_key = %key, "Cached body is gzip but client does not accept it");
            None
        }
        ParseResult::Complete { message, .. } => {
            metrics::record_cache_lookup("hit");
            tracing::debug!(cache_key = %key, "Serving from cache");
            Some(message)
        }
        _ => {
            tracing::warn!(cache_key = %key, "Cached entry is not a valid response, ignoring it");
            None
        }
    }
}

/// Forward `request` and store the answer if it is cacheable.
async fn forward_and_store(
    request: &Request,
    context: &ProxyContext,
    key: CacheKey,
    accepts_gzip: bool,
) -> Result<Response, UpstreamError> {
    let response = context.forwarder.forward(request).await?;
    let ttl = context.policy.ttl_for(request, &response);

    let was_compressed = response.is_compressed();
    let mut response = maybe_compress(response, accepts_gzip, &context.compression);
    if response.is_compressed() && !was_compressed {
        metrics::record_compressed();
    }
    response.add_proxy_headers(&context.via_name, context.forwarder.address());
    // hop-by-hop; set per client when the response is written
    response.headers.remove("connection");
    response.headers.remove("keep-alive");

    if let (Some(cache), Some(ttl)) = (&context.cache, ttl) {
        let stored = Bytes::from(serialize_response(&response));
        if let Err(e) = cache.store(key, stored, ttl).await {
            tracing::warn!(error = %e, "Cache store failed");
        }
    }

    Ok(response)
}
