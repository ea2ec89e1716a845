//! The [`Connection`] value and the [`Transport`] seam.
//!
//! A connection is an explicit value carrying its identity and role.  The
//! relay components receive it as an argument and look up registry state
//! rather than closing over it.
//!
//! The transport layer (WebSocket in `tether-server`, recording doubles in
//! tests) implements [`Transport`].  Every method is non-blocking: a send to a
//! slow or closed peer must never stall a fan-out to the remaining clients.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

use super::auth::Role;

/// Unique identity of one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first group is enough to tell sessions apart in logs.
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// WebSocket close status code (RFC 6455 §7.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// 1000: normal closure.
    pub const NORMAL: Self = Self(1000);
    /// 1001: the endpoint is going away (server shutdown, superseded device).
    pub const GOING_AWAY: Self = Self(1001);
    /// 1008: policy violation, used for failed authentication.
    pub const POLICY_VIOLATION: Self = Self(1008);
}

/// Errors returned by [`Transport`] send operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection is closing or already closed.
    #[error("connection is closed")]
    Closed,
    /// The outbound buffer is full; the frame was dropped.
    #[error("outbound queue is full")]
    QueueFull,
}

/// Callbacks from the relay core into the transport layer.
pub trait Transport: Send + Sync {
    /// Queues one binary frame.  Never blocks.
    fn send(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Queues a transport-level ping.  Never blocks.
    fn ping(&self) -> Result<(), TransportError>;

    /// Starts a graceful close with `code` and a plain-text `reason`.
    fn close(&self, code: CloseCode, reason: &str);

    /// Tears the connection down immediately without a closing handshake.
    fn terminate(&self);

    /// Whether frames can still be queued.
    fn is_open(&self) -> bool;
}

/// A live, admitted transport session.
///
/// Cloning is cheap; clones share the transport and the activity timestamp
/// and compare equal.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    role: Role,
    transport: Arc<dyn Transport>,
    last_activity: Arc<Mutex<Instant>>,
}

impl Connection {
    /// Wraps an admitted transport.
    pub fn new(role: Role, transport: Arc<dyn Transport>, now: Instant) -> Self {
        Self {
            id: ConnectionId::new(),
            role,
            transport,
            last_activity: Arc::new(Mutex::new(now)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Queues `payload` on this connection's transport.
    pub fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.transport.send(payload)
    }

    /// Records inbound activity at `now`.
    pub fn touch(&self, now: Instant) {
        let mut last = self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if now > *last {
            *last = now;
        }
    }

    /// Time of the most recent inbound frame (or of admission).
    pub fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("open", &self.transport.is_open())
            .finish()
    }
}
