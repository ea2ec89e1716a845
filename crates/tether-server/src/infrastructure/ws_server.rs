//! WebSocket server: accept loop and per-connection tasks.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each accepted socket to a WebSocket, capturing the offered
//!    `Sec-WebSocket-Protocol` values and echoing the first token back.
//! 3. Handing the connection to [`RelayHub::admit`].
//! 4. Running a reader loop that reports payloads, pongs, and the final
//!    close to the hub, plus a writer task fed by [`WsTransport`].
//! 5. Shutting down when the `running` flag is cleared.
//!
//! Each connection runs in its own Tokio task, so a slow or stuck peer never
//! delays the accept loop or any other peer.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use tether_core::{parse_subprotocols, Transport};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, error, info, warn};

use crate::application::RelayHub;
use crate::domain::RelayConfig;
use crate::infrastructure::keepalive::KeepalivePinger;
use crate::infrastructure::ws_transport::{write_frames, WsTransport};

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// How long a rejected peer gets to acknowledge the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `config.bind_addr`, wires the hub (and keepalive pinger, if
/// configured), and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the keepalive HTTP
/// client cannot be built.
pub async fn run_server(config: RelayConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.bind_addr))?;

    info!("relay listening on {}", config.bind_addr);

    let mut hub = RelayHub::from_config(&config);
    if let Some(keepalive) = &config.keepalive {
        let pinger = Arc::new(KeepalivePinger::new(keepalive)?);
        pinger.spawn();
        hub = hub.with_liveness_hook(pinger);
        info!(url = %keepalive.url, interval = ?keepalive.interval, "keepalive pinger enabled");
    }

    serve(listener, Arc::new(hub), config.outbound_queue, running).await
}

/// Accepts connections on an already-bound listener until `running` is
/// cleared, then closes every registered peer with 1001.
pub async fn serve(
    listener: TcpListener,
    hub: Arc<RelayHub>,
    outbound_queue: usize,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                debug!("new connection from {peer}");
                let hub = Arc::clone(&hub);
                tokio::spawn(async move {
                    handle_connection(stream, peer, hub, outbound_queue).await;
                });
            }
            Ok(Err(e)) => {
                // Transient (e.g. file-descriptor exhaustion); keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    hub.close_all();
    Ok(())
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<RelayHub>,
    outbound_queue: usize,
) {
    match run_connection(stream, peer, hub, outbound_queue).await {
        Ok(()) => debug!("connection {peer} finished"),
        Err(e) => warn!("connection {peer} failed: {e:#}"),
    }
}

async fn run_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<RelayHub>,
    outbound_queue: usize,
) -> anyhow::Result<()> {
    let mut offered: Vec<String> = Vec::new();
    let ws = accept_hdr_async(stream, |request: &Request, mut response: Response| {
        offered = offered_subprotocols(request);
        if let Some(selected) = selected_subprotocol(&offered) {
            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, selected);
        }
        Ok::<Response, ErrorResponse>(response)
    })
    .await
    .with_context(|| format!("WebSocket handshake failed with {peer}"))?;

    let (sink, mut source) = ws.split();
    let (transport, outbound) = WsTransport::new(peer, outbound_queue);
    let writer = tokio::spawn(write_frames(sink, outbound, transport.killed()));

    let conn = match hub.admit(Arc::clone(&transport) as Arc<dyn Transport>, &offered) {
        Ok(conn) => conn,
        Err(e) => {
            debug!("connection {peer} rejected: {e}");
            // The close frame is already queued; give the peer a moment to
            // read it and answer before the socket drops.
            let _ = timeout(CLOSE_GRACE, async {
                let _ = writer.await;
                while let Some(Ok(_)) = source.next().await {}
            })
            .await;
            return Ok(());
        }
    };

    info!(conn = %conn.id(), role = %conn.role(), "{peer} admitted");

    let mut killed = transport.killed();
    loop {
        let message = tokio::select! {
            _ = killed.wait_for(|killed| *killed) => {
                debug!(conn = %conn.id(), "connection terminated locally");
                break;
            }
            message = source.next() => message,
        };

        match message {
            Some(Ok(WsMessage::Binary(bytes))) => hub.on_payload(&conn, &bytes),
            Some(Ok(WsMessage::Text(text))) => hub.on_payload(&conn, text.as_bytes()),
            Some(Ok(WsMessage::Pong(_))) => hub.on_pong(&conn),
            Some(Ok(WsMessage::Ping(_))) => {
                // tungstenite queues the pong reply itself.
                debug!(conn = %conn.id(), "ping received");
            }
            Some(Ok(WsMessage::Close(frame))) => {
                // Keep reading so tungstenite can finish the close handshake.
                debug!(conn = %conn.id(), ?frame, "close frame received");
            }
            Some(Ok(WsMessage::Frame(_))) => {}
            Some(Err(e)) => {
                debug!(conn = %conn.id(), "read ended: {e}");
                break;
            }
            None => break,
        }
    }

    hub.on_closed(&conn);
    transport.terminate();
    let _ = writer.await;
    Ok(())
}

/// Every `Sec-WebSocket-Protocol` header value, in request order.
fn offered_subprotocols(request: &Request) -> Vec<String> {
    request
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// The subprotocol echoed back in the handshake response: the first offered
/// token, so standards-compliant clients accept the upgrade.
fn selected_subprotocol(offered: &[String]) -> Option<HeaderValue> {
    parse_subprotocols(offered)
        .into_iter()
        .next()
        .filter(|token| !token.is_empty())
        .and_then(|token| HeaderValue::from_str(&token).ok())
}
