//! Realtime chat and notification client.
//!
//! [`ChatService`] owns the single notification socket of a console session,
//! the per-peer message cache and unread counters, and the [`EventBus`] that
//! fans state changes out to UI consumers.
//!
//! # Architecture
//!
//! ```text
//!   consumer ──connect/send_message/mark_as_read──► ChatService ──► Transport
//!      ▲                                               │  ▲
//!      │                                               │  └── handle_transport_event ◄── runtime pump
//!      └──────────────── EventBus ◄── emit ────────────┘
//! ```
//!
//! The service is an explicitly constructed handle; clone it to share it with
//! several consumers. All state lives behind one mutex. Each operation
//! mutates under the lock and appends the events it produced to a single
//! outbox before releasing it. Whichever caller finds the outbox idle drains
//! it in order, so subscriber callbacks may call back into the service and
//! events always reach subscribers in the order the state changed.
//!
//! # Submodules
//!
//! - [`connection`] - connect/disconnect state machine and reconnection policy
//! - `dispatch` - inbound frame handling
//! - `outbound` - chat messages and notification commands sent by this client

// Rust guideline compliant 2026-02

pub mod connection;
mod dispatch;
mod outbound;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use connection::{ConnectionState, Endpoint, ReconnectPolicy};
pub use outbound::SendError;

use crate::cache::{ChatMessage, MessageCache};
use crate::events::{ChatEvent, EventBus, EventKind, SubscriptionId};
use crate::protocol::PeerId;
use crate::transport::{ConnectionId, TimerId, Transport};

/// Settings the service needs to reach the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSettings {
    /// Where the notification socket lives.
    pub endpoint: Endpoint,
    /// How to retry after the socket drops.
    pub reconnect: ReconnectPolicy,
}

/// Shared handle to the realtime chat session.
#[derive(Clone)]
pub struct ChatService {
    inner: Arc<Inner>,
}

struct Inner {
    bus: EventBus,
    state: Mutex<State>,
    outbox: Mutex<Outbox>,
}

/// Events waiting for delivery, in the order their state changes happened.
#[derive(Default)]
struct Outbox {
    queue: VecDeque<ChatEvent>,
    /// Set while some caller is delivering; others only append.
    draining: bool,
}

/// Everything guarded by the service mutex.
struct State {
    settings: ChatSettings,
    transport: Box<dyn Transport>,
    cache: MessageCache,
    connection: ConnectionState,
    /// Socket currently owned by the service, if any.
    conn_id: Option<ConnectionId>,
    next_conn: u64,
    peer: Option<PeerId>,
    token: Option<String>,
    should_reconnect: bool,
    reconnect_attempts: u32,
    pending_timer: Option<TimerId>,
    next_timer: u64,
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ChatService")
            .field("connection", &state.connection)
            .field("peer", &state.peer)
            .field("reconnect_attempts", &state.reconnect_attempts)
            .field("should_reconnect", &state.should_reconnect)
            .finish_non_exhaustive()
    }
}

impl ChatService {
    /// Create a disconnected service that drives `transport`.
    #[must_use]
    pub fn new(settings: ChatSettings, transport: Box<dyn Transport>) -> Self {
        let state = State {
            settings,
            transport,
            cache: MessageCache::new(),
            connection: ConnectionState::Disconnected,
            conn_id: None,
            next_conn: 0,
            peer: None,
            token: None,
            should_reconnect: false,
            reconnect_attempts: 0,
            pending_timer: None,
            next_timer: 0,
        };
        Self {
            inner: Arc::new(Inner {
                bus: EventBus::new(),
                state: Mutex::new(state),
                outbox: Mutex::new(Outbox::default()),
            }),
        }
    }

    /// Event bus consumers subscribe on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Shorthand for `events().subscribe(kind, callback)`.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&ChatEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(kind, callback)
    }

    /// Shorthand for `events().unsubscribe(kind, id)`.
    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(kind, id)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.inner.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the state lock, then deliver whatever events it queued.
    ///
    /// Events are appended to the outbox before the state lock is released,
    /// so outbox order always matches the order of state changes. A call made
    /// from inside a subscriber only appends; the outermost caller delivers.
    fn with_state<R>(&self, f: impl FnOnce(&mut State, &mut Vec<ChatEvent>) -> R) -> R {
        let result = {
            let mut state = self.lock();
            let mut pending = Vec::new();
            let result = f(&mut state, &mut pending);
            if !pending.is_empty() {
                self.outbox().queue.extend(pending);
            }
            result
        };
        self.drain_outbox();
        result
    }

    /// Emit queued events until the outbox is empty, unless another caller
    /// is already doing so.
    fn drain_outbox(&self) {
        {
            let mut outbox = self.outbox();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        loop {
            let event = {
                let mut outbox = self.outbox();
                match outbox.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            self.inner.bus.emit(&event);
        }
    }

    // ------------------------------------------------------------------
    // Cache queries
    // ------------------------------------------------------------------

    /// Messages exchanged with `peer`, oldest first.
    #[must_use]
    pub fn get_messages(&self, peer: PeerId) -> Vec<ChatMessage> {
        self.lock().cache.messages(peer)
    }

    /// Reset `peer`'s unread counter and emit `unread_update` with 0.
    pub fn mark_as_read(&self, peer: PeerId) {
        self.with_state(|state, events| {
            state.cache.reset_unread(peer);
            events.push(ChatEvent::UnreadUpdate {
                peer_id: peer,
                count: 0,
            });
        });
    }

    /// Unread messages from `peer`.
    #[must_use]
    pub fn get_unread_count(&self, peer: PeerId) -> u32 {
        self.lock().cache.unread(peer)
    }

    /// Copy of every unread counter.
    #[must_use]
    pub fn get_all_unread_counts(&self) -> HashMap<PeerId, u32> {
        self.lock().cache.all_unread()
    }

    /// Unread messages across all peers.
    #[must_use]
    pub fn total_unread(&self) -> u64 {
        self.lock().cache.total_unread()
    }

    /// Drop all cached messages and counters, then emit `messages_cleared`.
    pub fn clear_all_messages(&self) {
        self.with_state(|state, events| {
            state.cache.clear();
            events.push(ChatEvent::MessagesCleared);
        });
    }

    /// Whether the socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock().connection == ConnectionState::Open
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.lock().connection
    }

    /// Profile this session is connected as, if any.
    #[must_use]
    pub fn peer_identity(&self) -> Option<PeerId> {
        self.lock().peer
    }

    /// Automatic reconnection attempts made since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }
}
