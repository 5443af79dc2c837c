//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! client bytes
//!     → codec.rs (frame + parse into Request)
//!     → server.rs (cache lookup, forward, cache store)
//!     → compression.rs (optional gzip of the upstream body)
//!     → codec.rs (serialize Response)
//!     → client socket
//! ```
//!
//! # Design Decisions
//! - Messages are plain values; no I/O below server.rs
//! - Headers keep wire order and casing, lookups are case-insensitive

pub mod codec;
pub mod compression;
pub mod headers;
pub mod request;
pub mod response;
pub mod server;

pub use codec::{
    parse_request, parse_request_within, parse_response, parse_response_head, serialize_request,
    serialize_response, serialize_response_head, ParseError, ParseResult,
};
pub use headers::Headers;
pub use request::Request;
pub use response::Response;
pub use server::ProxyServer;
