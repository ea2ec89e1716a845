//! StateNotifier: tells clients whether the device is connected.
//!
//! The state frame is `[STATE_COMMAND_BYTE, 1]` (online) or
//! `[STATE_COMMAND_BYTE, 0]` (offline), built by
//! [`tether_core::state_frame`].  It shares its first byte with the device's
//! liveness marker, which the relay never forwards, so a client can treat any
//! frame starting with `0x0F` as a state change.

use std::sync::Arc;

use tether_core::{state_frame, Connection, ConnectionRegistry};
use tracing::{debug, warn};

/// Sends device-state frames to clients.
pub struct StateNotifier {
    registry: Arc<ConnectionRegistry>,
}

impl StateNotifier {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Broadcasts the device state to every open client.  Returns how many
    /// clients accepted the frame.
    pub fn announce(&self, device_online: bool) -> usize {
        let frame = state_frame(device_online);
        let delivered = self
            .registry
            .snapshot_clients()
            .iter()
            .filter(|client| self.deliver(client, &frame))
            .count();
        debug!(device_online, delivered, "announced device state");
        delivered
    }

    /// Sends the device state to a single client, typically right after it
    /// registers so it does not wait for the next change.
    pub fn announce_to(&self, client: &Connection, device_online: bool) -> bool {
        self.deliver(client, &state_frame(device_online))
    }

    fn deliver(&self, client: &Connection, frame: &[u8]) -> bool {
        if !client.is_open() {
            return false;
        }
        match client.send(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!(conn = %client.id(), "failed to send state frame: {e}");
                false
            }
        }
    }
}
