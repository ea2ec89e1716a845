//! Domain state for the relay.
//!
//! Nothing in this module performs I/O or touches an async runtime.  Time is
//! always passed in as an [`std::time::Instant`] so callers (and tests) decide
//! what "now" means.

pub mod auth;
pub mod connection;
pub mod heartbeat;
pub mod registry;

pub use auth::{parse_subprotocols, AuthError, AuthGate, Rejection, Role};
pub use connection::{CloseCode, Connection, ConnectionId, Transport, TransportError};
pub use heartbeat::{HeartbeatMachine, HeartbeatState, Tick};
pub use registry::ConnectionRegistry;
