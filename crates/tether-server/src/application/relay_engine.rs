//! RelayEngine: moves opaque payloads between the device and its clients.
//!
//! ```text
//! device ──[payload]──► every open client        (fan-out)
//! device ──[0x0F ..]──► consumed as liveness     (never forwarded)
//! client ──[payload]──► current device, if any   (unicast, else dropped)
//! ```
//!
//! Fan-out walks a registry snapshot.  A client that disconnects mid-way is
//! skipped; its own close event removes it from the registry.

use std::sync::Arc;

use tether_core::{classify_device_payload, ConnectionRegistry, DevicePayload};
use tracing::{debug, warn};

/// What happened to one device payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceDispatch {
    /// The payload was an in-band liveness marker.
    Liveness,
    /// The payload was offered to every client in the snapshot.
    Relayed {
        /// Clients that accepted the frame.
        delivered: usize,
        /// Clients that were closed or whose send failed.
        skipped: usize,
    },
}

/// Routes payloads using the registry.
pub struct RelayEngine {
    registry: Arc<ConnectionRegistry>,
}

impl RelayEngine {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Handles one payload from the device.
    pub fn on_device_payload(&self, payload: &[u8]) -> DeviceDispatch {
        let payload = match classify_device_payload(payload) {
            DevicePayload::Liveness => return DeviceDispatch::Liveness,
            DevicePayload::Relay(payload) => payload,
        };

        let mut delivered = 0;
        let mut skipped = 0;
        for client in self.registry.snapshot_clients() {
            if !client.is_open() {
                skipped += 1;
                continue;
            }
            match client.send(payload) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(conn = %client.id(), "dropping device frame for client: {e}");
                    skipped += 1;
                }
            }
        }

        debug!(len = payload.len(), delivered, skipped, "device → clients");
        DeviceDispatch::Relayed { delivered, skipped }
    }

    /// Handles one payload from a client.  Returns whether it reached the
    /// device; a missing or closed device drops the payload silently.
    pub fn on_client_payload(&self, payload: &[u8]) -> bool {
        let Some(device) = self.registry.current_device() else {
            debug!(len = payload.len(), "no device connected; client frame dropped");
            return false;
        };
        if !device.is_open() {
            debug!(len = payload.len(), "device closing; client frame dropped");
            return false;
        }
        match device.send(payload) {
            Ok(()) => {
                debug!(len = payload.len(), "client → device");
                true
            }
            Err(e) => {
                warn!(conn = %device.id(), "failed to forward client frame to device: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{recorded, RecordingTransport};
    use std::sync::atomic::Ordering;
    use tether_core::{Connection, Role};

    fn engine_with_clients(n: usize) -> (RelayEngine, Arc<ConnectionRegistry>, Vec<(Connection, Arc<RecordingTransport>)>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let clients: Vec<_> = (0..n).map(|_| recorded(Role::Client)).collect();
        for (conn, _) in &clients {
            registry.register_client(conn.clone());
        }
        (RelayEngine::new(Arc::clone(&registry)), registry, clients)
    }

    #[test]
    fn test_device_payload_reaches_all_clients_unmodified() {
        // Arrange
        let (engine, _registry, clients) = engine_with_clients(3);

        // Act
        let outcome = engine.on_device_payload(&[0x01, 0x02, 0x03]);

        // Assert
        assert_eq!(outcome, DeviceDispatch::Relayed { delivered: 3, skipped: 0 });
        for (_, transport) in &clients {
            assert_eq!(transport.frames(), vec![vec![0x01, 0x02, 0x03]]);
        }
    }

    #[test]
    fn test_liveness_marker_is_never_forwarded() {
        let (engine, _registry, clients) = engine_with_clients(2);

        let outcome = engine.on_device_payload(&[0x0F, 0x01]);

        assert_eq!(outcome, DeviceDispatch::Liveness);
        for (_, transport) in &clients {
            assert!(transport.frames().is_empty());
        }
    }

    #[test]
    fn test_closed_client_is_skipped_without_blocking_others() {
        let (engine, _registry, clients) = engine_with_clients(3);
        clients[1].1.hang_up();

        let outcome = engine.on_device_payload(&[0x42]);

        assert_eq!(outcome, DeviceDispatch::Relayed { delivered: 2, skipped: 1 });
        assert_eq!(clients[0].1.frames(), vec![vec![0x42]]);
        assert!(clients[1].1.frames().is_empty());
        assert_eq!(clients[2].1.frames(), vec![vec![0x42]]);
    }

    #[test]
    fn test_failing_client_is_skipped_and_left_registered() {
        let (engine, registry, clients) = engine_with_clients(2);
        clients[0].1.fail_sends.store(true, Ordering::SeqCst);

        let outcome = engine.on_device_payload(&[0x42]);

        assert_eq!(outcome, DeviceDispatch::Relayed { delivered: 1, skipped: 1 });
        // Removal is the job of the client's own close event.
        assert_eq!(registry.client_count(), 2);
    }

    #[test]
    fn test_client_removed_after_snapshot_gets_nothing_later() {
        let (engine, registry, clients) = engine_with_clients(2);
        engine.on_device_payload(&[0x01]);

        clients[0].1.hang_up();
        registry.unregister_client(&clients[0].0);
        engine.on_device_payload(&[0x02]);

        assert_eq!(clients[0].1.frames(), vec![vec![0x01]]);
        assert_eq!(clients[1].1.frames(), vec![vec![0x01], vec![0x02]]);
    }

    #[test]
    fn test_empty_device_payload_is_relayed() {
        let (engine, _registry, clients) = engine_with_clients(1);

        let outcome = engine.on_device_payload(&[]);

        assert_eq!(outcome, DeviceDispatch::Relayed { delivered: 1, skipped: 0 });
        assert_eq!(clients[0].1.frames(), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_client_payload_reaches_device() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (device, device_tx) = recorded(Role::Device);
        registry.register_device(device);
        let engine = RelayEngine::new(registry);

        assert!(engine.on_client_payload(&[0xAA]));

        assert_eq!(device_tx.frames(), vec![vec![0xAA]]);
    }

    #[test]
    fn test_client_payload_without_device_is_dropped() {
        let engine = RelayEngine::new(Arc::new(ConnectionRegistry::new()));
        assert!(!engine.on_client_payload(&[0xAA]));
    }

    #[test]
    fn test_client_payload_to_closing_device_is_dropped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (device, device_tx) = recorded(Role::Device);
        registry.register_device(device);
        device_tx.hang_up();
        let engine = RelayEngine::new(registry);

        assert!(!engine.on_client_payload(&[0xAA]));
        assert!(device_tx.frames().is_empty());
    }

    #[test]
    fn test_client_payload_starting_with_marker_byte_is_forwarded() {
        // The reserved byte only matters on the device → client path.
        let registry = Arc::new(ConnectionRegistry::new());
        let (device, device_tx) = recorded(Role::Device);
        registry.register_device(device);
        let engine = RelayEngine::new(registry);

        assert!(engine.on_client_payload(&[0x0F, 0x00]));
        assert_eq!(device_tx.frames(), vec![vec![0x0F, 0x00]]);
    }
}
