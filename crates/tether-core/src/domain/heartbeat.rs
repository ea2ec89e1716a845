//! HeartbeatMachine: the per-device liveness state machine.
//!
//! ```text
//!             start(id)                  tick: now - last_seen > threshold
//!   Idle ───────────────► Awaiting ─────────────────────────────────► Dead
//!    ▲                     │  ▲                                        │
//!    │                     │  │ tick within threshold / liveness       │
//!    │                     └──┘                                        │
//!    └──────────────── stop(id) (close, error, or eviction cleanup) ◄──┘
//! ```
//!
//! The machine is keyed by the device's [`ConnectionId`].  A tick, liveness
//! signal, or stop that names any other session is ignored, so a timer left
//! over from a superseded device can never evict its successor.  Once a
//! session reaches `Dead` every further tick reports [`Tick::Stale`], which
//! makes expiry a one-shot event.
//!
//! Time is an argument.  The server feeds it from its timer; tests feed it
//! directly.

use std::time::{Duration, Instant};

use super::connection::ConnectionId;

/// Observable state of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    /// No device session.
    Idle,
    /// Device present and heard from within the threshold.
    Awaiting,
    /// Threshold exceeded; the session is being evicted.
    Dead,
}

/// Outcome of one timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Still alive; the driver may send a liveness probe.
    Continue,
    /// This tick moved the session to `Dead`.  Reported exactly once.
    Expired,
    /// The tick belongs to a session that is no longer awaiting; the driver
    /// should stop its timer.
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct Session {
    id: ConnectionId,
    last_seen: Instant,
    dead: bool,
}

/// Liveness tracker for the current device session.
#[derive(Debug, Clone)]
pub struct HeartbeatMachine {
    threshold: Duration,
    session: Option<Session>,
}

impl HeartbeatMachine {
    /// Creates an idle machine that declares a session dead after
    /// `threshold` without a liveness signal.
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            session: None,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn state(&self) -> HeartbeatState {
        match self.session {
            None => HeartbeatState::Idle,
            Some(Session { dead: true, .. }) => HeartbeatState::Dead,
            Some(_) => HeartbeatState::Awaiting,
        }
    }

    /// The device session currently tracked, dead or alive.
    pub fn session(&self) -> Option<ConnectionId> {
        self.session.map(|s| s.id)
    }

    /// Begins tracking `id` with `last_seen = now`.  Returns the session it
    /// replaced, if any.
    pub fn start(&mut self, id: ConnectionId, now: Instant) -> Option<ConnectionId> {
        let previous = self.session.replace(Session {
            id,
            last_seen: now,
            dead: false,
        });
        previous.map(|s| s.id).filter(|prev| *prev != id)
    }

    /// Records a liveness signal (pong or in-band marker) for `id`.
    ///
    /// Returns `false` if `id` is not the awaiting session.
    pub fn record_liveness(&mut self, id: ConnectionId, now: Instant) -> bool {
        match self.session.as_mut() {
            Some(session) if session.id == id && !session.dead => {
                if now > session.last_seen {
                    session.last_seen = now;
                }
                true
            }
            _ => false,
        }
    }

    /// Evaluates one timer tick for `id`.
    pub fn tick(&mut self, id: ConnectionId, now: Instant) -> Tick {
        match self.session.as_mut() {
            Some(session) if session.id == id && !session.dead => {
                if now.saturating_duration_since(session.last_seen) > self.threshold {
                    session.dead = true;
                    Tick::Expired
                } else {
                    Tick::Continue
                }
            }
            _ => Tick::Stale,
        }
    }

    /// Returns to `Idle` if `id` is the tracked session.
    pub fn stop(&mut self, id: ConnectionId) -> bool {
        if self.session() == Some(id) {
            self.session = None;
            true
        } else {
            false
        }
    }

    /// How long ago `id` was last heard from, if it is the tracked session.
    pub fn silence(&self, id: ConnectionId, now: Instant) -> Option<Duration> {
        self.session
            .filter(|s| s.id == id)
            .map(|s| now.saturating_duration_since(s.last_seen))
    }
}
