//! Infrastructure layer for tether-server.
//!
//! The infrastructure layer handles all I/O: the TCP listener, the WebSocket
//! handshake and framing, per-connection reader/writer tasks, and the
//! outbound keepalive HTTP requests.
//!
//! # Responsibilities
//!
//! - Binding a TCP listener and running the accept loop
//! - Performing the WebSocket upgrade and subprotocol negotiation
//! - Implementing [`Transport`](tether_core::Transport) over a bounded queue
//! - Handling the graceful shutdown signal
//!
//! # What does NOT belong here?
//!
//! - Authentication, routing, or heartbeat decisions (application layer)
//! - Configuration parsing (domain layer and `main.rs`)

pub mod keepalive;
pub mod ws_server;
pub mod ws_transport;

pub use keepalive::KeepalivePinger;
pub use ws_server::{run_server, serve};
pub use ws_transport::WsTransport;
