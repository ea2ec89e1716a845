//! Tether relay server — entry point.
//!
//! Accepts WebSocket connections, authenticates each one as either the single
//! `device` or one of many `client`s, and relays opaque binary payloads
//! between them while watching the device's liveness.
//!
//! # Usage
//!
//! ```text
//! tether-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>               TOML config file
//!   --bind <ADDR>                 Listener IP address [default: 0.0.0.0]
//!   --port <PORT>                 Listener port [default: 3000]
//!   --secret <SECRET>             Shared secret (required)
//!   --heartbeat-interval <SECS>   Device ping period [default: 10]
//!   --heartbeat-timeout <SECS>    Silence before eviction [default: interval + 5]
//!   --outbound-queue <FRAMES>     Per-connection send buffer [default: 256]
//!   --log-level <FILTER>          Used when RUST_LOG is unset [default: info]
//!   --keepalive-url <URL>         Enable the keepalive pinger
//!   --keepalive-interval <SECS>   Keepalive period [default: 600]
//! ```
//!
//! # Configuration sources
//!
//! Highest precedence first: command-line flags, environment variables, the
//! TOML file named by `--config`, then built-in defaults.
//!
//! | Variable                    | Flag                   |
//! |-----------------------------|------------------------|
//! | `TETHER_CONFIG`             | `--config`             |
//! | `TETHER_BIND`               | `--bind`               |
//! | `PORT`                      | `--port`               |
//! | `TETHER_SECRET`             | `--secret`             |
//! | `TETHER_HEARTBEAT_INTERVAL` | `--heartbeat-interval` |
//! | `TETHER_HEARTBEAT_TIMEOUT`  | `--heartbeat-timeout`  |
//! | `TETHER_KEEPALIVE_URL`      | `--keepalive-url`      |
//! | `TETHER_KEEPALIVE_INTERVAL` | `--keepalive-interval` |

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether_server::domain::{
    bind_addr, ConfigError, FileConfig, KeepaliveConfig, RelayConfig,
    DEFAULT_KEEPALIVE_INTERVAL, HEARTBEAT_GRACE,
};
use tether_server::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket relay bridging one device to many clients.
///
/// Every field is optional so that unset flags fall through to the config
/// file and then to the defaults.
#[derive(Debug, Default, Parser)]
#[command(
    name = "tether-server",
    about = "WebSocket relay bridging one authenticated device to many clients",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the listener to.
    #[arg(long, env = "TETHER_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Shared secret every peer must present as its second subprotocol.
    #[arg(long, env = "TETHER_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Device heartbeat period in seconds.
    #[arg(long, env = "TETHER_HEARTBEAT_INTERVAL")]
    heartbeat_interval: Option<u64>,

    /// Seconds of device silence before eviction.
    #[arg(long, env = "TETHER_HEARTBEAT_TIMEOUT")]
    heartbeat_timeout: Option<u64>,

    /// Frames buffered per connection before sends are dropped.
    #[arg(long)]
    outbound_queue: Option<usize>,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long)]
    log_level: Option<String>,

    /// URL to GET periodically so the host does not idle the process.
    #[arg(long, env = "TETHER_KEEPALIVE_URL")]
    keepalive_url: Option<String>,

    /// Keepalive period in seconds.
    #[arg(long, env = "TETHER_KEEPALIVE_INTERVAL")]
    keepalive_interval: Option<u64>,
}

impl Cli {
    /// Layers these arguments over `file` and the defaults, then validates.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is malformed or the merged
    /// configuration fails [`RelayConfig::validate`].
    fn into_relay_config(self, file: FileConfig) -> anyhow::Result<RelayConfig> {
        let defaults = RelayConfig::default();

        let host = self
            .bind
            .or(file.bind)
            .unwrap_or_else(|| defaults.bind_addr.ip().to_string());
        let port = self.port.or(file.port).unwrap_or(defaults.bind_addr.port());

        let heartbeat_interval = self
            .heartbeat_interval
            .or(file.heartbeat_interval_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.heartbeat_interval);
        let heartbeat_timeout = match self.heartbeat_timeout.or(file.heartbeat_timeout_secs) {
            Some(secs) => Duration::from_secs(secs),
            None => heartbeat_interval.checked_add(HEARTBEAT_GRACE).ok_or(
                ConfigError::HeartbeatTooLong {
                    setting: "heartbeat interval",
                    value: heartbeat_interval,
                },
            )?,
        };

        let file_keepalive = file.keepalive;
        let keepalive_url = self
            .keepalive_url
            .or_else(|| file_keepalive.as_ref().map(|k| k.url.clone()));
        let keepalive_interval = self
            .keepalive_interval
            .or_else(|| file_keepalive.as_ref().and_then(|k| k.interval_secs))
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_KEEPALIVE_INTERVAL);

        let config = RelayConfig {
            bind_addr: bind_addr(&host, port)?,
            secret: self.secret.or(file.secret).unwrap_or_default(),
            heartbeat_interval,
            heartbeat_timeout,
            outbound_queue: self
                .outbound_queue
                .or(file.outbound_queue)
                .unwrap_or(defaults.outbound_queue),
            log_level: self
                .log_level
                .or(file.log_level)
                .unwrap_or(defaults.log_level),
            keepalive: keepalive_url.map(|url| KeepaliveConfig {
                url,
                interval: keepalive_interval,
            }),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Reads the TOML file at `path`, or returns an empty layer when no file
/// was given.
fn load_file_config(path: Option<&Path>) -> anyhow::Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    FileConfig::from_toml(&text)
        .with_context(|| format!("invalid config file {}", path.display()))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = load_file_config(cli.config.as_deref())?;
    let config = cli.into_relay_config(file)?;

    // `RUST_LOG` wins; otherwise use the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        bind = %config.bind_addr,
        heartbeat_interval = ?config.heartbeat_interval,
        heartbeat_timeout = ?config.heartbeat_timeout,
        "tether relay starting"
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C — shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("tether relay stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
