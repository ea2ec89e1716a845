//! Outbound keepalive pinger.
//!
//! Some hosting platforms idle a process that receives no inbound HTTP
//! traffic, even while WebSocket peers are connected.  The pinger issues a
//! plain `GET` against a configured URL (usually the relay's own public
//! address) on a fixed period, and additionally whenever the device proves
//! it is alive, but never more than once per period.
//!
//! Failures are logged and otherwise ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::application::LivenessHook;
use crate::domain::KeepaliveConfig;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sentinel for "no request sent yet".
const NEVER: u64 = u64::MAX;

pub struct KeepalivePinger {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    origin: Instant,
    /// Milliseconds since `origin` of the last claimed request.
    last_sent: AtomicU64,
}

impl KeepalivePinger {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &KeepaliveConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build keepalive HTTP client")?;
        Ok(Self {
            client,
            url: config.url.clone(),
            interval: config.interval,
            origin: Instant::now(),
            last_sent: AtomicU64::new(NEVER),
        })
    }

    /// Starts the periodic loop.  The first request goes out one full
    /// interval after startup.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let pinger = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(pinger.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if pinger.claim() {
                    fetch(&pinger.client, &pinger.url).await;
                }
            }
        })
    }

    /// Reserves the right to send one request now.  Returns `false` if a
    /// request already went out within the last interval.
    fn claim(&self) -> bool {
        let now = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX - 1);
        let period = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX);
        let last = self.last_sent.load(Ordering::Acquire);
        if last != NEVER && now.saturating_sub(last) < period {
            return false;
        }
        self.last_sent
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl LivenessHook for KeepalivePinger {
    fn on_device_alive(&self) {
        if !self.claim() {
            return;
        }
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            fetch(&client, &url).await;
        });
    }
}

async fn fetch(client: &reqwest::Client, url: &str) {
    match client.get(url).send().await {
        Ok(response) if response.status().is_success() => {
            debug!(status = %response.status(), "keepalive ok");
        }
        Ok(response) => warn!(status = %response.status(), "keepalive got non-success status"),
        Err(e) => warn!("keepalive request failed: {e}"),
    }
}
