//! Recording transport double shared by the application-layer tests.
//!
//! Every frame, ping, close, and terminate is recorded in memory so tests can
//! assert exactly what the relay sent and in what order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tether_core::{CloseCode, Connection, Role, Transport, TransportError};

#[derive(Default)]
pub(crate) struct RecordingTransport {
    /// Frames accepted by `send`, in order.
    pub sent: Mutex<Vec<Vec<u8>>>,
    /// Number of successful `ping` calls.
    pub pings: AtomicUsize,
    /// Code and reason of the first `close` call.
    pub closed_with: Mutex<Option<(CloseCode, String)>>,
    /// Set by `terminate`.
    pub terminated: AtomicBool,
    /// Set by `close`, `terminate`, or a test simulating a peer hang-up.
    pub closed: AtomicBool,
    /// When set, `send` fails with `QueueFull` while staying open.
    pub fail_sends: AtomicBool,
}

impl RecordingTransport {
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn hang_up(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::QueueFull);
        }
        self.sent.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    fn ping(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self, code: CloseCode, reason: &str) {
        let mut closed_with = self.closed_with.lock().unwrap();
        if closed_with.is_none() {
            *closed_with = Some((code, reason.to_string()));
        }
        self.closed.store(true, Ordering::SeqCst);
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

/// Builds an admitted connection over a fresh recording transport.
pub(crate) fn recorded(role: Role) -> (Connection, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let conn = Connection::new(
        role,
        Arc::clone(&transport) as Arc<dyn Transport>,
        super::now(),
    );
    (conn, transport)
}
