//! Domain layer for tether-server.
//!
//! Pure configuration types.  The relay's connection-state rules live in
//! `tether-core`; this layer only describes how a running server is set up.

pub mod config;

pub use config::{
    bind_addr, ConfigError, FileConfig, FileKeepalive, KeepaliveConfig, RelayConfig,
    DEFAULT_KEEPALIVE_INTERVAL, HEARTBEAT_GRACE, MAX_HEARTBEAT,
};
