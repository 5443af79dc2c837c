//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind with backlog, accept loop)
//!     → connection.rs (ID assignment, lifetime tracking)
//!     → session.rs (per-connection request cycle state)
//!     → Hand off to HTTP layer
//!
//! Session States:
//!     AwaitingRequest → RequestReady → AwaitingUpstream → ResponseReady → (AwaitingRequest | Closed)
//! ```
//!
//! # Design Decisions
//! - No connection cap beyond the OS accept queue
//! - Each connection tracked for graceful shutdown

pub mod connection;
pub mod listener;
pub mod session;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};
pub use session::{ConnectionSession, Progress, SessionState};
