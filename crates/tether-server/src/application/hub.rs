//! RelayHub: reacts to transport events for every connection.
//!
//! The infrastructure layer reports four events per connection and the hub
//! turns each into registry, heartbeat, relay, and notification work:
//!
//! | Event        | Client                          | Device                                      |
//! |--------------|---------------------------------|---------------------------------------------|
//! | `admit`      | register, send current state    | replace slot, start heartbeat, broadcast online |
//! | `on_payload` | unicast to device               | liveness marker or fan-out                  |
//! | `on_pong`    | activity only                   | liveness                                    |
//! | `on_closed`  | unregister                      | evict if current, broadcast offline         |
//!
//! Admission and eviction (with their announcements) run under one lifecycle
//! lock, so every client observes state frames in the same order as the
//! registry changes: on supersession `[0x0F, 0]` always precedes `[0x0F, 1]`.
//! Device fan-out takes the same lock, so a frame from a device never reaches
//! a client after that device's offline frame, and a new client gets its
//! state frame before any relayed data.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tether_core::{
    parse_subprotocols, AuthError, AuthGate, CloseCode, Connection, ConnectionRegistry,
    HeartbeatState, Role, Transport,
};
use tracing::{debug, info, warn};

use super::{now, DeviceDispatch, HeartbeatMonitor, RelayEngine, StateNotifier};
use crate::domain::RelayConfig;

/// Observer notified whenever the current device proves it is alive.
pub trait LivenessHook: Send + Sync {
    fn on_device_alive(&self);
}

/// Wires the auth gate, registry, relay engine, notifier, and heartbeat
/// monitor to transport events.
pub struct RelayHub {
    gate: AuthGate,
    registry: Arc<ConnectionRegistry>,
    engine: RelayEngine,
    notifier: StateNotifier,
    heartbeat: HeartbeatMonitor,
    liveness_hook: Option<Arc<dyn LivenessHook>>,
    lifecycle: Mutex<()>,
}

impl RelayHub {
    pub fn new(gate: AuthGate, heartbeat_interval: Duration, heartbeat_timeout: Duration) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            gate,
            engine: RelayEngine::new(Arc::clone(&registry)),
            notifier: StateNotifier::new(Arc::clone(&registry)),
            registry,
            heartbeat: HeartbeatMonitor::new(heartbeat_interval, heartbeat_timeout),
            liveness_hook: None,
            lifecycle: Mutex::new(()),
        }
    }

    /// Builds a hub from a validated configuration.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            AuthGate::new(config.secret.clone()),
            config.heartbeat_interval,
            config.heartbeat_timeout,
        )
    }

    pub fn with_liveness_hook(mut self, hook: Arc<dyn LivenessHook>) -> Self {
        self.liveness_hook = Some(hook);
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn heartbeat_state(&self) -> HeartbeatState {
        self.heartbeat.state()
    }

    /// Authenticates a freshly opened transport and registers it by role.
    ///
    /// `offered` holds the raw `Sec-WebSocket-Protocol` header values in
    /// request order.  On rejection the transport is closed with 1008 and
    /// nothing is registered.
    pub fn admit(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        offered: &[String],
    ) -> Result<Connection, AuthError> {
        let tokens = parse_subprotocols(offered);
        let role = match self.gate.authenticate(&tokens) {
            Ok(role) => role,
            Err(e) => {
                warn!("rejecting connection: {e}");
                transport.close(CloseCode::POLICY_VIOLATION, e.close_reason());
                return Err(e);
            }
        };

        let conn = Connection::new(role, transport, now());
        let _guard = self.lifecycle();
        match role {
            Role::Client => {
                self.notifier.announce_to(&conn, self.registry.has_device());
                self.registry.register_client(conn.clone());
                info!(
                    conn = %conn.id(),
                    clients = self.registry.client_count(),
                    "client connected"
                );
            }
            Role::Device => self.install_device(conn.clone()),
        }
        Ok(conn)
    }

    /// Handles one inbound data frame.
    pub fn on_payload(&self, conn: &Connection, payload: &[u8]) {
        conn.touch(now());
        match conn.role() {
            Role::Device => {
                let _guard = self.lifecycle();
                if !self.registry.is_current_device(conn) {
                    debug!(conn = %conn.id(), "frame from superseded device dropped");
                    return;
                }
                if self.engine.on_device_payload(payload) == DeviceDispatch::Liveness {
                    self.device_alive(conn);
                }
            }
            Role::Client => {
                self.engine.on_client_payload(payload);
            }
        }
    }

    /// Handles a transport-level pong.
    pub fn on_pong(&self, conn: &Connection) {
        conn.touch(now());
        if conn.role() == Role::Device {
            self.device_alive(conn);
        }
    }

    /// Handles a close or transport error.  Safe to call more than once.
    pub fn on_closed(&self, conn: &Connection) {
        match conn.role() {
            Role::Client => {
                let _guard = self.lifecycle();
                if self.registry.unregister_client(conn) {
                    info!(
                        conn = %conn.id(),
                        clients = self.registry.client_count(),
                        "client disconnected"
                    );
                }
            }
            Role::Device => {
                if self.evict_device(conn) {
                    info!(conn = %conn.id(), "device disconnected");
                }
            }
        }
    }

    /// Closes every registered connection with 1001, for server shutdown.
    pub fn close_all(&self) {
        let _guard = self.lifecycle();
        if let Some(device) = self.registry.current_device() {
            self.heartbeat.stop(&device);
            device.transport().close(CloseCode::GOING_AWAY, "server shutting down");
        }
        for client in self.registry.snapshot_clients() {
            client.transport().close(CloseCode::GOING_AWAY, "server shutting down");
        }
    }

    fn install_device(self: &Arc<Self>, device: Connection) {
        if let Some(previous) = self.registry.register_device(device.clone()) {
            info!(old = %previous.id(), new = %device.id(), "device superseded");
            self.heartbeat.stop(&previous);
            previous.transport().terminate();
            self.notifier.announce(false);
        }

        let hub: Weak<Self> = Arc::downgrade(self);
        self.heartbeat.start(device.clone(), move |expired| {
            if let Some(hub) = hub.upgrade() {
                hub.expire_device(&expired);
            }
        });

        let notified = self.notifier.announce(true);
        info!(conn = %device.id(), notified, "device connected");
    }

    /// Heartbeat timeout: tear the device down and evict it.
    fn expire_device(&self, device: &Connection) {
        device.transport().terminate();
        if self.evict_device(device) {
            info!(conn = %device.id(), "device evicted after heartbeat timeout");
        }
    }

    /// Clears the slot if `device` still holds it.  Only the caller that
    /// actually clears the slot broadcasts offline.
    fn evict_device(&self, device: &Connection) -> bool {
        let _guard = self.lifecycle();
        let cleared = self.registry.clear_device_if_current(device);
        self.heartbeat.stop(device);
        if cleared {
            self.notifier.announce(false);
        }
        cleared
    }

    fn device_alive(&self, device: &Connection) {
        if !self.heartbeat.record_liveness(device) {
            return;
        }
        if let Some(hook) = &self.liveness_hook {
            hook.on_device_alive();
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
