//! Application layer for tether-server.
//!
//! The application layer orchestrates the relay: it knows *what* to do with
//! each transport event, but delegates *how* bytes move to the
//! infrastructure layer through the [`Transport`](tether_core::Transport)
//! trait.
//!
//! # Responsibilities
//!
//! - [`RelayHub`]: reacts to `accepted / payload / pong / closed` events.
//! - [`RelayEngine`]: device → clients fan-out, client → device unicast.
//! - [`StateNotifier`]: device online/offline frames.
//! - [`HeartbeatMonitor`]: the tokio timer driving the heartbeat machine.
//!
//! # What does NOT belong here?
//!
//! - Sockets, the WebSocket handshake, or frame encoding (infrastructure)
//! - Configuration parsing (domain + `main.rs`)

pub mod heartbeat;
pub mod hub;
pub mod notifier;
pub mod relay_engine;

#[cfg(test)]
pub(crate) mod testing;

pub use heartbeat::HeartbeatMonitor;
pub use hub::{LivenessHook, RelayHub};
pub use notifier::StateNotifier;
pub use relay_engine::{DeviceDispatch, RelayEngine};

/// Current time on the tokio clock, as a std `Instant`.
///
/// Going through tokio keeps paused-clock tests and the heartbeat timer on
/// the same timeline.
pub(crate) fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
