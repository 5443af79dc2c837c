//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges (timeouts > 0, ports valid)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::cache::MAX_TTL;
use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a socket address")]
    BindAddress(String),
    #[error("listener.backlog must be greater than zero")]
    ZeroBacklog,
    #[error("upstream.address {0:?} must be host:port")]
    UpstreamAddress(String),
    #[error("timeouts.idle_secs must be greater than zero")]
    ZeroIdleTimeout,
    #[error("cache.default_ttl_secs must be greater than zero")]
    ZeroTtl,
    #[error("cache.default_ttl_secs {0} exceeds the {max} second maximum", max = MAX_TTL.as_secs())]
    TtlTooLarge(u64),
    #[error("cache.channel_capacity must be greater than zero")]
    ZeroChannelCapacity,
    #[error("compression.level {0} is out of range 0-9")]
    CompressionLevel(u32),
    #[error("limits.{0} must be greater than zero")]
    ZeroLimit(&'static str),
    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),
}

/// Check `config` for semantic errors, collecting all of them.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.backlog == 0 {
        errors.push(ValidationError::ZeroBacklog);
    }
    if !is_host_port(&config.upstream.address) {
        errors.push(ValidationError::UpstreamAddress(config.upstream.address.clone()));
    }
    if config.timeouts.idle_secs == 0 {
        errors.push(ValidationError::ZeroIdleTimeout);
    }
    if config.cache.enabled {
        if config.cache.default_ttl_secs == 0 {
            errors.push(ValidationError::ZeroTtl);
        } else if config.cache.default_ttl_secs > MAX_TTL.as_secs() {
            errors.push(ValidationError::TtlTooLarge(config.cache.default_ttl_secs));
        }
        if config.cache.channel_capacity == 0 {
            errors.push(ValidationError::ZeroChannelCapacity);
        }
    }
    if config.compression.level > 9 {
        errors.push(ValidationError::CompressionLevel(config.compression.level));
    }
    if config.limits.max_request_bytes == 0 {
        errors.push(ValidationError::ZeroLimit("max_request_bytes"));
    }
    if config.limits.max_response_bytes == 0 {
        errors.push(ValidationError::ZeroLimit("max_response_bytes"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(config.observability.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().map(|p| p > 0).unwrap_or(false),
        None => false,
    }
}
