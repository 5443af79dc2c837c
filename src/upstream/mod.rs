//! Upstream forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! Request (cache miss)
//!     → forwarder.rs (connect, serialize with X-Forwarded-For/Via, write)
//!     → read + parse_response until Complete
//!     → close upstream socket
//!     → Response back to the connection task
//! ```
//!
//! # Design Decisions
//! - No pooling: one fresh TCP connection per forwarded request
//! - Connect is time-bounded, the round trip is not
//! - Failures surface as `UpstreamError`; the caller closes the client

pub mod forwarder;

pub use forwarder::{UpstreamError, UpstreamForwarder};
