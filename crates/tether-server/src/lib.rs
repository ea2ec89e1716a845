//! tether-server library crate.
//!
//! A WebSocket relay that bridges exactly one authenticated device to any
//! number of authenticated clients.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! device ◄──WS──► [tether-server] ◄──WS──► clients (0..n)
//!   ├── domain/           RelayConfig, FileConfig, ConfigError
//!   ├── application/      RelayHub, RelayEngine, StateNotifier, HeartbeatMonitor
//!   └── infrastructure/
//!         ├── ws_server/     accept loop and per-connection reader (tokio-tungstenite)
//!         ├── ws_transport/  bounded outbound queue and writer task
//!         └── keepalive/     optional outbound HTTP pinger (reqwest)
//! ```
//!
//! The connection-state rules (auth gate, registry, heartbeat state machine,
//! control framing) live in `tether-core` and carry no async runtime.
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `tether-core`; it spawns timers
//!   but never touches a socket.
//! - `infrastructure` depends on all other layers plus `tokio-tungstenite`
//!   and `reqwest`.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: relay orchestration.
pub mod application;

/// Infrastructure layer: WebSocket server, transport, keepalive.
pub mod infrastructure;
