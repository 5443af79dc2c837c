//! Per-connection request/response cycle state.
//!
//! # State Machine
//! ```text
//! AwaitingRequest ──Complete──▶ RequestReady ──forward──▶ AwaitingUpstream
//!        ▲                          │                          │
//!        │                      cache hit                  response
//!        │                          ▼                          ▼
//!        └────keep-alive──── ResponseReady ◀───────────────────┘
//!                                   │
//!                              !keep-alive
//!                                   ▼
//!                                Closed
//! ```
//! `Invalid` input, peer EOF and idle timeout go to `Closed` from anywhere.
//!
//! # Design Decisions
//! - Pure state, no sockets: the async driver in `http::server` does the I/O
//! - Bytes past the end of a request stay buffered for the next cycle

use std::net::SocketAddr;

use bytes::{Buf, BytesMut};

use crate::http::codec::{parse_request_within, ParseError, ParseResult};
use crate::http::Request;
use crate::net::connection::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingRequest,
    RequestReady,
    AwaitingUpstream,
    ResponseReady,
    Closed,
}

/// Result of feeding bytes to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Keep reading.
    NeedMore,
    /// A full request is available via `request()`.
    Ready,
    /// The buffered bytes can never form a request; the session is closed.
    Failed(ParseError),
}

#[derive(Debug)]
pub struct ConnectionSession {
    id: ConnectionId,
    peer: SocketAddr,
    buffer: BytesMut,
    request: Option<Request>,
    state: SessionState,
    keep_alive: bool,
    max_request_bytes: usize,
    cycles: u64,
}

impl ConnectionSession {
    pub fn new(id: ConnectionId, peer: SocketAddr, max_request_bytes: usize) -> Self {
        Self {
            id,
            peer,
            buffer: BytesMut::with_capacity(4096),
            request: None,
            state: SessionState::AwaitingRequest,
            keep_alive: false,
            max_request_bytes,
            cycles: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Completed request/response cycles on this connection.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Keep-alive decision for the current cycle.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The request of the current cycle, once one has been parsed.
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Buffer for the driver to read into directly.
    pub fn read_buffer(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Append bytes from the peer and try to complete a request.
    pub fn receive(&mut self, data: &[u8]) -> Progress {
        self.buffer.extend_from_slice(data);
        self.advance()
    }

    /// Re-run the parser over whatever is buffered.
    pub fn advance(&mut self) -> Progress {
        match self.state {
            SessionState::AwaitingRequest => {}
            SessionState::RequestReady => return Progress::Ready,
            _ => return Progress::NeedMore,
        }

        match parse_request_within(&self.buffer, self.max_request_bytes) {
            ParseResult::Incomplete => Progress::NeedMore,
            ParseResult::Invalid(e) => {
                self.state = SessionState::Closed;
                Progress::Failed(e)
            }
            ParseResult::Complete { mut message, consumed } => {
                self.buffer.advance(consumed);
                message.client_addr = Some(self.peer.ip());
                self.keep_alive = message.keep_alive();
                self.request = Some(message);
                self.state = SessionState::RequestReady;
                Progress::Ready
            }
        }
    }

    /// The request is going upstream.
    pub fn begin_forward(&mut self) {
        debug_assert_eq!(self.state, SessionState::RequestReady);
        self.state = SessionState::AwaitingUpstream;
    }

    /// A response is ready to write, from the upstream or the cache.
    pub fn response_ready(&mut self) {
        debug_assert!(matches!(
            self.state,
            SessionState::RequestReady | SessionState::AwaitingUpstream
        ));
        self.state = SessionState::ResponseReady;
    }

    /// The response has been written. Returns true if another cycle may follow.
    pub fn finish_cycle(&mut self) -> bool {
        self.cycles += 1;
        self.request = None;
        if self.keep_alive {
            self.state = SessionState::AwaitingRequest;
            true
        } else {
            self.state = SessionState::Closed;
            false
        }
    }

    /// Peer went away, timed out, or the cycle failed.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.request = None;
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Bytes received but not yet part of a parsed request.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
