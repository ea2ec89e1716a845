//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! `main.rs` builds it from, in order of precedence: CLI flags, environment
//! variables, an optional TOML file ([`FileConfig`]), and [`Default`].
//!
//! Nothing in this module reads files or the environment; it only parses and
//! validates values handed to it.
//!
//! # Liveness threshold
//!
//! The device is declared dead when nothing has been heard from it for
//! `heartbeat_timeout`.  The default is the heartbeat interval plus a 5 s
//! grace period (10 s + 5 s), which tolerates one late pong.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors produced while assembling or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No shared secret was configured.
    #[error("a shared secret is required (--secret or TETHER_SECRET)")]
    MissingSecret,

    /// The heartbeat interval is zero.
    #[error("heartbeat interval must be greater than zero")]
    ZeroInterval,

    /// The timeout would expire before a single probe could be answered.
    #[error("heartbeat timeout ({timeout:?}) must be longer than the interval ({interval:?})")]
    TimeoutNotAfterInterval { interval: Duration, timeout: Duration },

    /// A heartbeat setting exceeds [`MAX_HEARTBEAT`] or overflows.
    #[error("{setting} ({value:?}) must not exceed {max:?}", max = MAX_HEARTBEAT)]
    HeartbeatTooLong { setting: &'static str, value: Duration },

    /// The per-connection outbound queue has no capacity.
    #[error("outbound queue capacity must be greater than zero")]
    ZeroQueue,

    /// The keepalive URL is not an absolute http(s) URL.
    #[error("keepalive url must start with http:// or https://, got '{0}'")]
    InvalidKeepaliveUrl(String),

    /// The keepalive period is zero.
    #[error("keepalive interval must be greater than zero")]
    ZeroKeepaliveInterval,

    /// The bind address could not be parsed.
    #[error("invalid bind address '{0}'")]
    InvalidBindAddr(String),

    /// The TOML file could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings for the optional outbound keepalive pinger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// URL fetched with an HTTP GET to keep the hosting platform awake.
    pub url: String,
    /// Minimum time between two keepalive requests.
    pub interval: Duration,
}

/// All runtime configuration for the relay.
///
/// Build this once at startup, then share it behind an `Arc`.
#[derive(Clone)]
pub struct RelayConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// Shared secret every peer must present as its second subprotocol token.
    pub secret: String,

    /// Period of the device heartbeat timer.  Each tick sends a
    /// transport-level ping to the device.
    pub heartbeat_interval: Duration,

    /// Silence after which the device session is evicted.
    pub heartbeat_timeout: Duration,

    /// Frames buffered per connection before sends start failing.
    pub outbound_queue: usize,

    /// Fallback `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Outbound keepalive pinger, disabled when `None`.
    pub keepalive: Option<KeepaliveConfig>,
}

/// Slack added to the heartbeat interval when no timeout is configured.
pub const HEARTBEAT_GRACE: Duration = Duration::from_secs(5);

/// Upper bound for the heartbeat interval and timeout.
pub const MAX_HEARTBEAT: Duration = Duration::from_secs(3600);

/// Default keepalive period when only a URL is configured.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(600);

impl Default for RelayConfig {
    /// Local-development defaults.  The secret is empty, so
    /// [`RelayConfig::validate`] fails until one is supplied.
    ///
    /// | Field              | Default         |
    /// |--------------------|-----------------|
    /// | bind_addr          | `0.0.0.0:3000`  |
    /// | heartbeat_interval | 10 seconds      |
    /// | heartbeat_timeout  | 15 seconds      |
    /// | outbound_queue     | 256 frames      |
    /// | log_level          | `info`          |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            secret: String::new(),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(10) + HEARTBEAT_GRACE,
            outbound_queue: 256,
            log_level: "info".to_string(),
            keepalive: None,
        }
    }
}

impl RelayConfig {
    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.heartbeat_interval > MAX_HEARTBEAT {
            return Err(ConfigError::HeartbeatTooLong {
                setting: "heartbeat interval",
                value: self.heartbeat_interval,
            });
        }
        if self.heartbeat_timeout > MAX_HEARTBEAT {
            return Err(ConfigError::HeartbeatTooLong {
                setting: "heartbeat timeout",
                value: self.heartbeat_timeout,
            });
        }
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(ConfigError::TimeoutNotAfterInterval {
                interval: self.heartbeat_interval,
                timeout: self.heartbeat_timeout,
            });
        }
        if self.outbound_queue == 0 {
            return Err(ConfigError::ZeroQueue);
        }
        if let Some(keepalive) = &self.keepalive {
            if !(keepalive.url.starts_with("http://") || keepalive.url.starts_with("https://")) {
                return Err(ConfigError::InvalidKeepaliveUrl(keepalive.url.clone()));
            }
            if keepalive.interval.is_zero() {
                return Err(ConfigError::ZeroKeepaliveInterval);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("bind_addr", &self.bind_addr)
            .field("secret", &"<redacted>")
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .field("outbound_queue", &self.outbound_queue)
            .field("log_level", &self.log_level)
            .field("keepalive", &self.keepalive)
            .finish()
    }
}

/// On-disk configuration.  Every field is optional; missing values fall
/// through to the environment/CLI layer or to [`RelayConfig::default`].
///
/// ```toml
/// bind = "0.0.0.0"
/// port = 3000
/// secret = "change-me"
/// heartbeat_interval_secs = 10
/// heartbeat_timeout_secs = 15
///
/// [keepalive]
/// url = "https://relay.example.com/"
/// interval_secs = 600
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub secret: Option<String>,
    pub heartbeat_interval_secs: Option<u64>,
    pub heartbeat_timeout_secs: Option<u64>,
    pub outbound_queue: Option<usize>,
    pub log_level: Option<String>,
    pub keepalive: Option<FileKeepalive>,
}

/// `[keepalive]` table of [`FileConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileKeepalive {
    pub url: String,
    pub interval_secs: Option<u64>,
}

impl FileConfig {
    /// Parses TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

/// Joins a host and port into a socket address.
pub fn bind_addr(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    format!("{host}:{port}")
        .parse()
        .map_err(|_| ConfigError::InvalidBindAddr(format!("{host}:{port}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RelayConfig {
        RelayConfig {
            secret: "secret1".to_string(),
            ..RelayConfig::default()
        }
    }

    #[test]
    fn test_default_port_is_3000() {
        assert_eq!(RelayConfig::default().bind_addr.port(), 3000);
    }

    #[test]
    fn test_default_threshold_is_interval_plus_grace() {
        let cfg = RelayConfig::default();
        assert_eq!(
            cfg.heartbeat_timeout,
            cfg.heartbeat_interval + Duration::from_secs(5)
        );
    }

    #[test]
    fn test_default_without_secret_fails_validation() {
        assert!(matches!(
            RelayConfig::default().validate(),
            Err(ConfigError::MissingSecret)
        ));
    }

    #[test]
    fn test_default_with_secret_is_valid() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let cfg = RelayConfig {
            heartbeat_interval: Duration::ZERO,
            ..valid()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroInterval)));
    }

    #[test]
    fn test_timeout_not_longer_than_interval_is_rejected() {
        let cfg = RelayConfig {
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(10),
            ..valid()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::TimeoutNotAfterInterval { .. })
        ));
    }

    #[test]
    fn test_zero_queue_is_rejected() {
        let cfg = RelayConfig {
            outbound_queue: 0,
            ..valid()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroQueue)));
    }

    #[test]
    fn test_keepalive_url_must_be_http() {
        let cfg = RelayConfig {
            keepalive: Some(KeepaliveConfig {
                url: "ftp://example.com".to_string(),
                interval: DEFAULT_KEEPALIVE_INTERVAL,
            }),
            ..valid()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidKeepaliveUrl(_))
        ));
    }

    #[test]
    fn test_zero_keepalive_interval_is_rejected() {
        let cfg = RelayConfig {
            keepalive: Some(KeepaliveConfig {
                url: "https://relay.example.com/".to_string(),
                interval: Duration::ZERO,
            }),
            ..valid()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ZeroKeepaliveInterval)
        ));
    }

    #[test]
    fn test_interval_above_max_is_rejected() {
        let cfg = RelayConfig {
            heartbeat_interval: MAX_HEARTBEAT + Duration::from_secs(1),
            heartbeat_timeout: MAX_HEARTBEAT,
            ..valid()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::HeartbeatTooLong { setting: "heartbeat interval", .. })
        ));
    }

    #[test]
    fn test_timeout_above_max_is_rejected() {
        let cfg = RelayConfig {
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(u64::MAX),
            ..valid()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::HeartbeatTooLong { setting: "heartbeat timeout", .. })
        ));
    }

    #[test]
    fn test_max_heartbeat_is_accepted() {
        let cfg = RelayConfig {
            heartbeat_interval: MAX_HEARTBEAT - Duration::from_secs(1),
            heartbeat_timeout: MAX_HEARTBEAT,
            ..valid()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_debug_output_redacts_secret() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("secret1"));
    }

    #[test]
    fn test_file_config_parses_all_fields() {
        let text = r#"
            bind = "127.0.0.1"
            port = 8080
            secret = "from-file"
            heartbeat_interval_secs = 5
            heartbeat_timeout_secs = 10
            outbound_queue = 64
            log_level = "debug"

            [keepalive]
            url = "https://relay.example.com/"
            interval_secs = 300
        "#;

        let file = FileConfig::from_toml(text).unwrap();

        assert_eq!(file.bind.as_deref(), Some("127.0.0.1"));
        assert_eq!(file.port, Some(8080));
        assert_eq!(file.secret.as_deref(), Some("from-file"));
        assert_eq!(file.heartbeat_interval_secs, Some(5));
        assert_eq!(file.heartbeat_timeout_secs, Some(10));
        assert_eq!(file.outbound_queue, Some(64));
        assert_eq!(file.log_level.as_deref(), Some("debug"));
        let keepalive = file.keepalive.unwrap();
        assert_eq!(keepalive.url, "https://relay.example.com/");
        assert_eq!(keepalive.interval_secs, Some(300));
    }

    #[test]
    fn test_empty_file_config_is_all_none() {
        assert_eq!(FileConfig::from_toml("").unwrap(), FileConfig::default());
    }

    #[test]
    fn test_unknown_file_key_is_rejected() {
        assert!(matches!(
            FileConfig::from_toml("sekret = \"typo\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_bind_addr_joins_host_and_port() {
        assert_eq!(bind_addr("127.0.0.1", 9000).unwrap().to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn test_bind_addr_rejects_hostname() {
        assert!(matches!(
            bind_addr("not.an.ip", 9000),
            Err(ConfigError::InvalidBindAddr(_))
        ));
    }
}
