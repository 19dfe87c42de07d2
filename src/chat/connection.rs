//! Connection lifecycle and reconnection policy.
//!
//! # State machine
//!
//! ```text
//!   Disconnected ──connect──► Connecting ──Opened──► Open
//!        ▲                        │                   │
//!        │                   Error/Closed        Error/Closed
//!        │                        ▼                   ▼
//!    disconnect ◄──────────────────────────────── Closed ──timer──► Connecting
//! ```
//!
//! Any state goes to `Disconnected` on [`ChatService::disconnect`], which is
//! also the only way to stop automatic reconnection.
//!
//! # Backoff
//!
//! After a close, attempt `n` (1-based) waits `min(base * 2^n, max)`. With the
//! defaults that is 2s, 4s, 8s, 16s, 30s; the sixth close emits
//! `max_reconnect_reached` and retrying stops until the next explicit
//! [`ChatService::connect`].

// Rust guideline compliant 2026-02

use std::time::Duration;

use super::{ChatService, State};
use crate::constants::{
    DEFAULT_WS_HOST, DEFAULT_WS_PORT, MAX_RECONNECT_ATTEMPTS, NOTIFICATIONS_PATH,
    RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_DELAY_MS,
};
use crate::events::ChatEvent;
use crate::protocol::PeerId;
use crate::transport::{ConnectionId, TimerId, TransportEvent};

/// Lifecycle of the notification socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket and no reconnection pending.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open; frames can be sent.
    Open,
    /// Socket dropped; a reconnect may be pending.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Address of the realtime server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Use `wss://` instead of `ws://`.
    pub secure: bool,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_WS_HOST.to_string(),
            port: DEFAULT_WS_PORT,
            secure: false,
        }
    }
}

impl Endpoint {
    /// Socket URL for `peer`, authenticated with `token`.
    #[must_use]
    pub fn url(&self, peer: PeerId, token: &str) -> String {
        format!("{self}{NOTIFICATIONS_PATH}/{peer}/?token={token}")
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.secure { "wss" } else { "ws" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts allowed before giving up.
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `base_delay * 2^n`.
    pub base_delay: Duration,
    /// Cap for a single delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay: Duration::from_millis(RECONNECT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(RECONNECT_MAX_DELAY_MS),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

impl ChatService {
    /// Open the notification socket as `peer`.
    ///
    /// - While a handshake is in flight the call is ignored.
    /// - If the socket is open for the same peer and token nothing happens;
    ///   for a different peer or token the old session is torn down first
    ///   (emitting `disconnected`).
    ///
    /// An explicit connect re-enables reconnection and restores the full
    /// retry budget. The outcome arrives later as `connected` / `error`.
    pub fn connect(&self, peer: PeerId, token: &str) {
        self.with_state(|state, events| state.connect(peer, token, events));
    }

    /// Close the socket and stop reconnecting.
    ///
    /// Cancels any pending reconnect timer, forgets peer and token, and emits
    /// `disconnected`. Events still in flight for the closed socket are
    /// ignored.
    pub fn disconnect(&self) {
        self.with_state(State::disconnect);
    }

    /// Feed one transport outcome into the state machine.
    ///
    /// Events for sockets or timers the service no longer owns are dropped.
    pub fn handle_transport_event(&self, event: TransportEvent) {
        self.with_state(|state, events| match event {
            TransportEvent::Opened(conn) => state.on_opened(conn, events),
            TransportEvent::Frame(conn, text) => {
                if state.is_current(conn) {
                    state.dispatch_text(&text, events);
                } else {
                    log::debug!("[ChatService] Dropping frame from stale {}", conn);
                }
            }
            TransportEvent::Error(conn, detail) => state.on_error(conn, detail, events),
            TransportEvent::Closed(conn) => state.on_closed(conn, events),
            TransportEvent::ReconnectDue(timer) => state.on_reconnect_due(timer),
        });
    }
}

impl State {
    pub(super) fn is_current(&self, conn: ConnectionId) -> bool {
        self.conn_id == Some(conn)
    }

    fn connect(&mut self, peer: PeerId, token: &str, events: &mut Vec<ChatEvent>) {
        match self.connection {
            ConnectionState::Connecting => {
                log::warn!("[ChatService] Handshake already in progress, ignoring connect");
                return;
            }
            ConnectionState::Open
                if self.peer == Some(peer) && self.token.as_deref() == Some(token) =>
            {
                log::debug!("[ChatService] Already connected as profile {}", peer);
                return;
            }
            ConnectionState::Open => {
                log::info!("[ChatService] Switching session to profile {}", peer);
                self.disconnect(events);
            }
            ConnectionState::Disconnected | ConnectionState::Closed => {}
        }

        self.cancel_pending_timer();
        self.reconnect_attempts = 0;
        self.should_reconnect = true;
        self.peer = Some(peer);
        self.token = Some(token.to_string());
        self.open_socket();
    }

    fn open_socket(&mut self) {
        let (Some(peer), Some(token)) = (self.peer, self.token.as_deref()) else {
            return;
        };
        let url = self.settings.endpoint.url(peer, token);

        if let Some(old) = self.conn_id.take() {
            self.transport.close(old);
        }

        self.next_conn += 1;
        let conn = ConnectionId(self.next_conn);
        self.conn_id = Some(conn);
        self.connection = ConnectionState::Connecting;

        log::info!(
            "[ChatService] Connecting profile {} to {} ({})",
            peer,
            self.settings.endpoint,
            conn
        );
        self.transport.open(conn, &url);
    }

    pub(super) fn disconnect(&mut self, events: &mut Vec<ChatEvent>) {
        log::info!("[ChatService] Disconnecting, reconnection disabled");
        self.should_reconnect = false;
        self.cancel_pending_timer();

        if let Some(conn) = self.conn_id.take() {
            self.transport.close(conn);
        }

        self.connection = ConnectionState::Disconnected;
        self.peer = None;
        self.token = None;
        events.push(ChatEvent::Disconnected);
    }

    fn on_opened(&mut self, conn: ConnectionId, events: &mut Vec<ChatEvent>) {
        if !self.is_current(conn) {
            log::debug!("[ChatService] Ignoring open of stale {}", conn);
            return;
        }
        log::info!("[ChatService] Connected ({})", conn);
        self.connection = ConnectionState::Open;
        self.reconnect_attempts = 0;
        events.push(ChatEvent::Connected(true));
    }

    fn on_error(&mut self, conn: ConnectionId, detail: String, events: &mut Vec<ChatEvent>) {
        if !self.is_current(conn) {
            log::debug!("[ChatService] Ignoring error from stale {}", conn);
            return;
        }
        log::error!("[ChatService] Socket error on {}: {}", conn, detail);
        self.connection = ConnectionState::Closed;
        events.push(ChatEvent::Error(detail));
    }

    fn on_closed(&mut self, conn: ConnectionId, events: &mut Vec<ChatEvent>) {
        if !self.is_current(conn) {
            log::debug!("[ChatService] Ignoring close of stale {}", conn);
            return;
        }
        log::info!("[ChatService] Socket closed ({})", conn);
        self.conn_id = None;
        self.connection = ConnectionState::Closed;
        events.push(ChatEvent::Connected(false));
        self.schedule_reconnect(events);
    }

    fn schedule_reconnect(&mut self, events: &mut Vec<ChatEvent>) {
        if !self.should_reconnect {
            log::debug!("[ChatService] Reconnection disabled, staying closed");
            return;
        }

        let policy = self.settings.reconnect;
        if self.reconnect_attempts >= policy.max_attempts {
            log::error!(
                "[ChatService] Giving up after {} reconnection attempts",
                self.reconnect_attempts
            );
            events.push(ChatEvent::MaxReconnectReached);
            return;
        }

        self.reconnect_attempts += 1;
        let delay = policy.delay_for(self.reconnect_attempts);

        self.cancel_pending_timer();
        self.next_timer += 1;
        let timer = TimerId(self.next_timer);
        self.pending_timer = Some(timer);

        log::info!(
            "[ChatService] Reconnecting in {}ms (attempt {}/{})",
            delay.as_millis(),
            self.reconnect_attempts,
            policy.max_attempts
        );
        self.transport.schedule_reconnect(timer, delay);
    }

    fn on_reconnect_due(&mut self, timer: TimerId) {
        if self.pending_timer != Some(timer) {
            log::debug!("[ChatService] Ignoring stale {}", timer);
            return;
        }
        self.pending_timer = None;

        if !self.should_reconnect
            || matches!(
                self.connection,
                ConnectionState::Connecting | ConnectionState::Open
            )
        {
            return;
        }
        // Retries keep the attempt counter; only a successful open resets it.
        self.open_socket();
    }

    fn cancel_pending_timer(&mut self) {
        if let Some(timer) = self.pending_timer.take() {
            self.transport.cancel_reconnect(timer);
        }
    }
}
