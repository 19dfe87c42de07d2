//! Side-effect seam between [`ChatService`](crate::chat::ChatService) and
//! the network.
//!
//! The service never touches sockets or timers directly. It tells a
//! [`Transport`] what to do (open, send, close, arm a reconnect timer) and
//! later receives the outcome as [`TransportEvent`]s through
//! [`ChatService::handle_transport_event`](crate::chat::ChatService::handle_transport_event).
//! Every event carries the [`ConnectionId`] or [`TimerId`] it belongs to, so
//! the service can discard events from sockets or timers it has already
//! abandoned.
//!
//! # Architecture
//!
//! ```text
//!   ChatService ──open/send/close──► WsTransport ──spawn──► socket task (per connection)
//!        ▲                               │                        │
//!        │                               └──spawn──► timer task   │
//!        │                                              │         │
//!        └──────── runtime pump ◄── mpsc<TransportEvent> ◄────────┘
//! ```

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ws::{self, WsMessage};

/// Identifies one socket opened by the service.
///
/// A fresh id is allocated for every open; events tagged with an older id are
/// stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Identifies one scheduled reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Outcome reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Opened(ConnectionId),
    /// Text frame received.
    Frame(ConnectionId, String),
    /// Socket-level failure. A [`TransportEvent::Closed`] follows.
    Error(ConnectionId, String),
    /// Socket is gone (handshake failure, server close, I/O error, local close).
    Closed(ConnectionId),
    /// A reconnect timer elapsed.
    ReconnectDue(TimerId),
}

/// Network and timer operations the service needs.
///
/// Implementations must not call back into the service synchronously; all
/// outcomes are delivered later as [`TransportEvent`]s.
pub trait Transport: Send {
    /// Begin opening a socket to `url`.
    fn open(&mut self, conn: ConnectionId, url: &str);

    /// Queue a text frame on an open socket.
    fn send(&mut self, conn: ConnectionId, text: String) -> Result<()>;

    /// Close a socket. Unknown ids are ignored.
    fn close(&mut self, conn: ConnectionId);

    /// Deliver [`TransportEvent::ReconnectDue`] after `delay`.
    fn schedule_reconnect(&mut self, timer: TimerId, delay: Duration);

    /// Cancel a scheduled reconnect. Unknown ids are ignored.
    fn cancel_reconnect(&mut self, timer: TimerId);
}

/// Frames queued for a socket task.
#[derive(Debug)]
enum Outgoing {
    Text(String),
    Close,
}

/// [`Transport`] backed by tokio tasks and `tokio-tungstenite`.
#[derive(Debug)]
pub struct WsTransport {
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    runtime: tokio::runtime::Handle,
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<Outgoing>>,
    timers: HashMap<TimerId, JoinHandle<()>>,
}

impl WsTransport {
    /// Create a transport that reports into `events_tx` and spawns on `runtime`.
    #[must_use]
    pub fn new(
        events_tx: mpsc::UnboundedSender<TransportEvent>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            events_tx,
            runtime,
            connections: HashMap::new(),
            timers: HashMap::new(),
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, conn: ConnectionId, url: &str) {
        self.connections.retain(|_, tx| !tx.is_closed());

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.connections.insert(conn, out_tx);
        self.runtime.spawn(run_socket(
            conn,
            url.to_string(),
            self.events_tx.clone(),
            out_rx,
        ));
    }

    fn send(&mut self, conn: ConnectionId, text: String) -> Result<()> {
        let tx = self
            .connections
            .get(&conn)
            .with_context(|| format!("no socket for {conn}"))?;
        tx.send(Outgoing::Text(text))
            .with_context(|| format!("socket task for {conn} has exited"))
    }

    fn close(&mut self, conn: ConnectionId) {
        if let Some(tx) = self.connections.remove(&conn) {
            let _ = tx.send(Outgoing::Close);
        }
    }

    fn schedule_reconnect(&mut self, timer: TimerId, delay: Duration) {
        self.timers.retain(|_, handle| !handle.is_finished());

        let events_tx = self.events_tx.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events_tx.send(TransportEvent::ReconnectDue(timer));
        });
        self.timers.insert(timer, handle);
    }

    fn cancel_reconnect(&mut self, timer: TimerId) {
        if let Some(handle) = self.timers.remove(&timer) {
            handle.abort();
            log::debug!("[Transport] Cancelled {}", timer);
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
        // Dropping the senders makes each socket task close its socket.
        self.connections.clear();
    }
}

/// Socket task: connect, then pump frames both ways until either side closes.
async fn run_socket(
    conn: ConnectionId,
    url: String,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    mut out_rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    let (mut writer, mut reader) = match ws::connect(&url).await {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!("[Transport] {} failed to connect: {:#}", conn, e);
            let _ = events_tx.send(TransportEvent::Error(conn, format!("{e:#}")));
            let _ = events_tx.send(TransportEvent::Closed(conn));
            return;
        }
    };

    log::info!("[Transport] {} connected", conn);
    let _ = events_tx.send(TransportEvent::Opened(conn));

    loop {
        tokio::select! {
            msg = reader.recv() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    log::trace!("[Transport] {} <- {}", conn, text);
                    if events_tx.send(TransportEvent::Frame(conn, text)).is_err() {
                        // Nobody is listening anymore
                        let _ = writer.close().await;
                        return;
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = writer.send_pong(data).await;
                }
                Some(Ok(WsMessage::Close { code, reason })) => {
                    log::info!("[Transport] {} closed by server ({} {})", conn, code, reason);
                    break;
                }
                Some(Ok(WsMessage::Binary(_) | WsMessage::Pong(_))) => {}
                Some(Err(e)) => {
                    log::warn!("[Transport] {} read error: {:#}", conn, e);
                    let _ = events_tx.send(TransportEvent::Error(conn, format!("{e:#}")));
                    break;
                }
                None => {
                    log::info!("[Transport] {} stream ended", conn);
                    break;
                }
            },
            out = out_rx.recv() => match out {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = writer.send_text(&text).await {
                        log::warn!("[Transport] {} write error: {:#}", conn, e);
                        let _ = events_tx.send(TransportEvent::Error(conn, format!("{e:#}")));
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    log::debug!("[Transport] {} closing", conn);
                    let _ = writer.close().await;
                    break;
                }
            },
        }
    }

    let _ = events_tx.send(TransportEvent::Closed(conn));
}
