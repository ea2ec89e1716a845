//! WebSocket implementation of the [`Transport`] seam.
//!
//! Each connection owns a bounded outbound queue drained by a dedicated
//! writer task.  The relay core only ever calls `try_send` on that queue, so
//! a slow peer can fill its own buffer but never stalls the fan-out to
//! everyone else.
//!
//! ```text
//!  RelayHub ──send/ping/close──► [mpsc, bounded] ──► writer task ──► WS sink
//!                  terminate ──► [watch: killed]  ──► writer + reader exit
//! ```
//!
//! A peer whose queue stays full for [`MAX_DROPPED_FRAMES`] consecutive
//! attempts is terminated.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{Sink, SinkExt};
use tether_core::{CloseCode, Transport, TransportError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, warn};

/// Consecutive full-queue drops after which a peer is considered stuck.
pub const MAX_DROPPED_FRAMES: usize = 64;

/// One queued instruction for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A binary data frame.
    Data(Vec<u8>),
    /// A transport-level ping with an empty payload.
    Ping,
    /// A close frame; the writer stops after sending it.
    Close(CloseCode, String),
}

/// Non-blocking handle to one WebSocket peer.
pub struct WsTransport {
    peer: SocketAddr,
    outbound: mpsc::Sender<Outbound>,
    open: AtomicBool,
    consecutive_drops: AtomicUsize,
    killed: watch::Sender<bool>,
}

impl WsTransport {
    /// Creates the handle and the receiving end of its outbound queue.
    pub fn new(peer: SocketAddr, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let (killed, _) = watch::channel(false);
        let transport = Arc::new(Self {
            peer,
            outbound,
            open: AtomicBool::new(true),
            consecutive_drops: AtomicUsize::new(0),
            killed,
        });
        (transport, rx)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// A receiver that flips to `true` once [`Transport::terminate`] runs.
    pub fn killed(&self) -> watch::Receiver<bool> {
        self.killed.subscribe()
    }

    fn enqueue(&self, frame: Outbound) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        match self.outbound.try_send(frame) {
            Ok(()) => {
                self.consecutive_drops.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.consecutive_drops.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped >= MAX_DROPPED_FRAMES {
                    warn!(peer = %self.peer, dropped, "outbound queue stuck; terminating");
                    self.terminate();
                }
                Err(TransportError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                self.open.store(false, Ordering::Release);
                Err(TransportError::Closed)
            }
        }
    }
}

impl Transport for WsTransport {
    fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.enqueue(Outbound::Data(payload.to_vec()))
    }

    fn ping(&self) -> Result<(), TransportError> {
        self.enqueue(Outbound::Ping)
    }

    fn close(&self, code: CloseCode, reason: &str) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        if self
            .outbound
            .try_send(Outbound::Close(code, reason.to_string()))
            .is_err()
        {
            // No room for the close frame; drop the connection instead.
            self.killed.send_replace(true);
        }
    }

    fn terminate(&self) {
        self.open.store(false, Ordering::Release);
        self.killed.send_replace(true);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Drains `outbound` into `sink` until the queue closes, a close frame is
/// sent, the sink fails, or the transport is terminated.
pub async fn write_frames<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Outbound>,
    mut killed: watch::Receiver<bool>,
) where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = killed.wait_for(|killed| *killed) => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let result = match frame {
            Outbound::Data(bytes) => sink.send(WsMessage::Binary(bytes)).await,
            Outbound::Ping => sink.send(WsMessage::Ping(Vec::new())).await,
            Outbound::Close(code, reason) => {
                let frame = CloseFrame {
                    code: WsCloseCode::from(code.0),
                    reason: reason.into(),
                };
                if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                    debug!("close frame not delivered: {e}");
                }
                break;
            }
        };

        if let Err(e) = result {
            debug!("WebSocket write failed: {e}");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;
    use std::sync::Mutex;
    use tokio_test::assert_ok;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    #[test]
    fn test_send_queues_a_data_frame() {
        // Arrange
        let (transport, mut rx) = WsTransport::new(peer(), 4);

        // Act
        assert_ok!(transport.send(&[1, 2, 3]));

        // Assert
        assert_eq!(rx.try_recv().ok(), Some(Outbound::Data(vec![1, 2, 3])));
    }

    #[test]
    fn test_full_queue_reports_queue_full_without_closing() {
        let (transport, _rx) = WsTransport::new(peer(), 1);
        assert_ok!(transport.send(&[1]));

        assert_eq!(transport.send(&[2]), Err(TransportError::QueueFull));
        assert!(transport.is_open());
    }

    #[test]
    fn test_stuck_peer_is_terminated_after_max_drops() {
        let (transport, _rx) = WsTransport::new(peer(), 1);
        let killed = transport.killed();
        assert_ok!(transport.send(&[0]));

        for _ in 0..MAX_DROPPED_FRAMES {
            let _ = transport.send(&[1]);
        }

        assert!(!transport.is_open());
        assert!(*killed.borrow());
    }

    #[test]
    fn test_successful_send_resets_drop_counter() {
        let (transport, mut rx) = WsTransport::new(peer(), 1);
        assert_ok!(transport.send(&[0]));
        for _ in 0..MAX_DROPPED_FRAMES - 1 {
            let _ = transport.send(&[1]);
        }

        let _ = rx.try_recv();
        assert_ok!(transport.send(&[2]));
        let _ = rx.try_recv();
        assert_ok!(transport.send(&[3]));
        let _ = transport.send(&[4]);

        assert!(transport.is_open());
    }

    #[test]
    fn test_close_queues_close_frame_and_rejects_later_sends() {
        let (transport, mut rx) = WsTransport::new(peer(), 4);

        transport.close(CloseCode::POLICY_VIOLATION, "Unauthorized");

        assert_eq!(
            rx.try_recv().ok(),
            Some(Outbound::Close(CloseCode::POLICY_VIOLATION, "Unauthorized".to_string()))
        );
        assert_eq!(transport.send(&[1]), Err(TransportError::Closed));
        assert_eq!(transport.ping(), Err(TransportError::Closed));
    }

    #[test]
    fn test_second_close_is_ignored() {
        let (transport, mut rx) = WsTransport::new(peer(), 4);

        transport.close(CloseCode::NORMAL, "bye");
        transport.close(CloseCode::GOING_AWAY, "again");

        assert!(matches!(rx.try_recv(), Ok(Outbound::Close(CloseCode::NORMAL, _))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_terminate_flips_killed_flag() {
        let (transport, _rx) = WsTransport::new(peer(), 4);
        let killed = transport.killed();

        transport.terminate();

        assert!(*killed.borrow());
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_writer_sends_frames_in_order_and_stops_after_close() {
        // Arrange
        let (transport, rx) = WsTransport::new(peer(), 8);
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = Box::pin(sink::unfold(Arc::clone(&written), |written, msg: WsMessage| async move {
            written.lock().unwrap().push(msg);
            Ok::<_, WsError>(written)
        }));
        assert_ok!(transport.send(&[7]));
        assert_ok!(transport.ping());
        transport.close(CloseCode::POLICY_VIOLATION, "Unauthorized");
        assert_ok!(transport.outbound.try_send(Outbound::Data(vec![9])));

        // Act
        write_frames(sink, rx, transport.killed()).await;

        // Assert: nothing after the close frame is written
        let written = written.lock().unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(written[0], WsMessage::Binary(vec![7]));
        assert_eq!(written[1], WsMessage::Ping(Vec::new()));
        match &written[2] {
            WsMessage::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1008);
                assert_eq!(frame.reason, "Unauthorized");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_writer_exits_when_terminated() {
        let (transport, rx) = WsTransport::new(peer(), 8);
        transport.terminate();

        write_frames(sink::drain().sink_map_err(|e| match e {}), rx, transport.killed()).await;
    }
}
