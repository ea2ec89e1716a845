//! # tether-core
//!
//! Connection-state core for the Tether relay: a single authenticated
//! *device* bridged to any number of authenticated *clients*.
//!
//! This crate holds every piece of relay logic that can be expressed without
//! sockets, timers, or an async runtime.  The `tether-server` crate drives it
//! from real WebSocket connections.
//!
//! # Architecture overview
//!
//! - **`protocol`** – The wire-level framing decision: one reserved control
//!   byte (`0x0F`) shared by the device-state frames sent to clients and the
//!   in-band liveness marker sent by the device.
//!
//! - **`domain`** – Pure relay state:
//!   - `auth`: the [`AuthGate`] that turns a subprotocol list into a [`Role`].
//!   - `connection`: the [`Connection`] value and the [`Transport`] seam the
//!     server implements.
//!   - `registry`: the [`ConnectionRegistry`] holding the device slot and the
//!     client set.
//!   - `heartbeat`: the [`HeartbeatMachine`] deciding when a silent device is
//!     dead.

pub mod domain;
pub mod protocol;

pub use domain::auth::{parse_subprotocols, AuthError, AuthGate, Rejection, Role};
pub use domain::connection::{CloseCode, Connection, ConnectionId, Transport, TransportError};
pub use domain::heartbeat::{HeartbeatMachine, HeartbeatState, Tick};
pub use domain::registry::ConnectionRegistry;
pub use protocol::control::{classify_device_payload, state_frame, DevicePayload, STATE_COMMAND_BYTE};
