//! HeartbeatMonitor: drives [`HeartbeatMachine`] from a tokio timer.
//!
//! One timer task exists per device session.  Every `interval` it asks the
//! machine whether the device has been silent for longer than the threshold:
//!
//! - still alive: a transport-level ping goes out and the timer keeps running;
//! - first tick past the threshold: the expiry callback runs once and the
//!   timer exits;
//! - tick for a session that is no longer current: the timer exits quietly.
//!
//! Starting a new session aborts the previous timer under the same lock that
//! installs the new one.  Even if an aborted timer was mid-tick, the machine's
//! session check turns that tick into a no-op.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tether_core::{Connection, ConnectionId, HeartbeatMachine, HeartbeatState, Tick};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::now;

struct Inner {
    machine: HeartbeatMachine,
    timer: Option<JoinHandle<()>>,
}

/// Liveness monitor for the current device session.
pub struct HeartbeatMonitor {
    interval: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl HeartbeatMonitor {
    /// Creates an idle monitor that ticks every `interval` and expires a
    /// session after `threshold` of silence.
    pub fn new(interval: Duration, threshold: Duration) -> Self {
        Self {
            interval,
            inner: Arc::new(Mutex::new(Inner {
                machine: HeartbeatMachine::new(threshold),
                timer: None,
            })),
        }
    }

    /// Starts a session for `device`, retiring any previous one.
    ///
    /// `on_expired` runs at most once, from the timer task, after the
    /// session is marked dead.  It is never called while the monitor's lock
    /// is held, so it may call back into [`stop`](Self::stop).
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(&self, device: Connection, on_expired: F)
    where
        F: FnOnce(Connection) + Send + 'static,
    {
        let mut inner = lock(&self.inner);
        if let Some(old) = inner.timer.take() {
            old.abort();
        }
        if let Some(replaced) = inner.machine.start(device.id(), now()) {
            debug!(old = %replaced, new = %device.id(), "heartbeat session replaced");
        }

        let shared = Arc::clone(&self.inner);
        let interval = self.interval;
        inner.timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outcome = lock(&shared).machine.tick(device.id(), now());
                match outcome {
                    Tick::Continue => {
                        if let Err(e) = device.transport().ping() {
                            debug!(conn = %device.id(), "heartbeat ping not queued: {e}");
                        }
                    }
                    Tick::Expired => {
                        warn!(conn = %device.id(), "device missed heartbeat threshold");
                        on_expired(device);
                        return;
                    }
                    Tick::Stale => return,
                }
            }
        }));
    }

    /// Records a pong or in-band liveness marker from `device`.
    pub fn record_liveness(&self, device: &Connection) -> bool {
        lock(&self.inner).machine.record_liveness(device.id(), now())
    }

    /// Ends the session for `device` and cancels its timer.  Returns `false`
    /// when `device` is not the tracked session.
    pub fn stop(&self, device: &Connection) -> bool {
        let mut inner = lock(&self.inner);
        if !inner.machine.stop(device.id()) {
            return false;
        }
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        true
    }

    pub fn state(&self) -> HeartbeatState {
        lock(&self.inner).machine.state()
    }

    pub fn session(&self) -> Option<ConnectionId> {
        lock(&self.inner).machine.session()
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.inner).timer.take() {
            timer.abort();
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
