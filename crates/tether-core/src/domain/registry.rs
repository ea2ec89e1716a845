//! ConnectionRegistry: the device slot and the client set.
//!
//! # Concurrency discipline
//!
//! All state sits behind one `std::sync::Mutex`.  Every public method takes
//! the lock once, does its work, and releases it before returning, so each
//! operation is a single critical section and no partial state is ever
//! observable.  The lock is never held across an `.await` or while calling a
//! [`Transport`](super::connection::Transport); callers fan out over
//! [`ConnectionRegistry::snapshot_clients`] instead of iterating the live set.
//!
//! # Device slot
//!
//! Last writer wins: [`register_device`](ConnectionRegistry::register_device)
//! always installs the new connection and hands the previous occupant back so
//! the caller can tear it down.  Close events are matched by identity through
//! [`clear_device_if_current`](ConnectionRegistry::clear_device_if_current), so
//! a late close from a superseded device cannot clear its successor.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::connection::Connection;

#[derive(Default)]
struct RegistryState {
    device: Option<Connection>,
    clients: Vec<Connection>,
}

/// In-memory registry of the admitted connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Registry state stays consistent even if a holder panicked: every
        // mutation is a single assignment or Vec operation.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs `conn` as the device and returns the evicted previous
    /// occupant, if any.
    pub fn register_device(&self, conn: Connection) -> Option<Connection> {
        let mut state = self.lock();
        let previous = state.device.replace(conn);
        // Re-registering the same connection is not an eviction.
        match (previous, state.device.as_ref()) {
            (Some(prev), Some(current)) if prev == *current => None,
            (previous, _) => previous,
        }
    }

    /// Adds `conn` to the client set.  No-op if it is already a member.
    pub fn register_client(&self, conn: Connection) {
        let mut state = self.lock();
        if state.clients.iter().any(|c| *c == conn) {
            debug!(conn = %conn.id(), "client already registered");
            return;
        }
        state.clients.push(conn);
    }

    /// Removes `conn` from the client set.  Returns whether it was a member;
    /// repeated calls for the same connection return `false`.
    pub fn unregister_client(&self, conn: &Connection) -> bool {
        let mut state = self.lock();
        let before = state.clients.len();
        state.clients.retain(|c| c != conn);
        state.clients.len() != before
    }

    /// Empties the device slot only if it still holds `conn`.
    pub fn clear_device_if_current(&self, conn: &Connection) -> bool {
        let mut state = self.lock();
        if state.device.as_ref() == Some(conn) {
            state.device = None;
            true
        } else {
            false
        }
    }

    /// The current device occupant.
    pub fn current_device(&self) -> Option<Connection> {
        self.lock().device.clone()
    }

    /// Whether `conn` is the current device.
    pub fn is_current_device(&self, conn: &Connection) -> bool {
        self.lock().device.as_ref() == Some(conn)
    }

    pub fn has_device(&self) -> bool {
        self.lock().device.is_some()
    }

    /// Point-in-time copy of the client set, in registration order.
    pub fn snapshot_clients(&self) -> Vec<Connection> {
        self.lock().clients.clone()
    }

    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }
}
