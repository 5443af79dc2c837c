//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! complete Request
//!     → store.rs fingerprint(method, path, version)
//!     → actor.rs lookup (hit: serve bytes, miss: forward)
//!     → policy.rs decides whether the upstream answer is storable
//!     → actor.rs store(key, serialized response, ttl)
//! ```
//!
//! # Design Decisions
//! - Expiry is checked on lookup only; nothing is ever evicted
//! - Headers and body are not part of the key
//! - One task owns the map, callers hold cheap cloneable handles

pub mod actor;
pub mod policy;
pub mod store;

pub use actor::{CacheError, CacheHandle};
pub use policy::CachePolicy;
pub use store::{fingerprint, CacheKey, ResponseCache, MAX_TTL};
