//! Synchronous publish/subscribe bus for chat events.
//!
//! Consumers (chat windows, conversation lists, notification panels) register
//! callbacks per [`EventKind`]; [`ChatService`](crate::chat::ChatService)
//! emits a [`ChatEvent`] after every state change.
//!
//! # Delivery rules
//!
//! - Callbacks for one kind run in registration order, on the emitting thread,
//!   before [`EventBus::emit`] returns.
//! - Registering the same callback twice yields two invocations per emission.
//! - `emit` works on a snapshot of the subscriber list taken before the first
//!   callback runs. Subscribing or unsubscribing from inside a callback only
//!   affects later emissions.
//! - A callback that returns `Err` or panics is logged; the remaining callbacks
//!   still run and the bus itself never fails.
//!
//! # Usage
//!
//! ```
//! use secvision_chat::events::{ChatEvent, EventBus, EventKind};
//!
//! let bus = EventBus::new();
//! let id = bus.subscribe(EventKind::Connected, |event| {
//!     if let ChatEvent::Connected(up) = event {
//!         println!("socket up: {up}");
//!     }
//!     Ok(())
//! });
//! assert_eq!(bus.emit(&ChatEvent::Connected(true)), 1);
//! bus.unsubscribe(EventKind::Connected, id);
//! ```

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::cache::ChatMessage;
use crate::protocol::{
    AllNotificationsRead, ConnectionEstablished, PeerId, PendingNotifications, ServerError,
};

/// Subscriber callback.
pub type Callback = Arc<dyn Fn(&ChatEvent) -> anyhow::Result<()> + Send + Sync>;

/// Event names a consumer can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Socket opened (`true`) or closed (`false`).
    Connected,
    /// Explicit disconnect finished.
    Disconnected,
    /// Socket-level error.
    Error,
    /// Reconnection budget exhausted.
    MaxReconnectReached,
    /// Inbound chat message cached.
    NewMessage,
    /// Outbound chat message transmitted and cached.
    MessageSent,
    /// Unread counter changed.
    UnreadUpdate,
    /// Outbound frame could not be sent.
    SendError,
    /// Cache cleared.
    MessagesCleared,
    /// New notification pushed by the server.
    NewNotification,
    /// Someone read a notification.
    NotificationRead,
    /// Server greeting after accept.
    ConnectionEstablished,
    /// Unread notification backlog.
    PendingNotifications,
    /// Mark-all-read confirmation.
    AllNotificationsRead,
    /// Server reported a protocol error.
    ServerError,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 15] = [
        Self::Connected,
        Self::Disconnected,
        Self::Error,
        Self::MaxReconnectReached,
        Self::NewMessage,
        Self::MessageSent,
        Self::UnreadUpdate,
        Self::SendError,
        Self::MessagesCleared,
        Self::NewNotification,
        Self::NotificationRead,
        Self::ConnectionEstablished,
        Self::PendingNotifications,
        Self::AllNotificationsRead,
        Self::ServerError,
    ];

    /// Event name as used by the web console.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::MaxReconnectReached => "max_reconnect_reached",
            Self::NewMessage => "new_message",
            Self::MessageSent => "message_sent",
            Self::UnreadUpdate => "unread_update",
            Self::SendError => "send_error",
            Self::MessagesCleared => "messages_cleared",
            Self::NewNotification => "nueva_notificacion",
            Self::NotificationRead => "notificacion_leida",
            Self::ConnectionEstablished => "connection_established",
            Self::PendingNotifications => "notificaciones_pendientes",
            Self::AllNotificationsRead => "todas_leidas",
            Self::ServerError => "server_error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an event name does not match any [`EventKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event name `{0}`")]
pub struct UnknownEventError(pub String);

impl std::str::FromStr for EventKind {
    type Err = UnknownEventError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| UnknownEventError(name.to_string()))
    }
}

/// Event payload delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Socket opened (`true`) or closed (`false`).
    Connected(bool),
    /// Explicit disconnect finished.
    Disconnected,
    /// Socket-level error detail.
    Error(String),
    /// Reconnection budget exhausted; no more automatic attempts.
    MaxReconnectReached,
    /// Inbound chat message appended to the cache.
    NewMessage {
        /// Counterpart the message belongs to.
        peer_id: PeerId,
        /// The cached message.
        message: ChatMessage,
    },
    /// Outbound chat message transmitted and appended to the cache.
    MessageSent {
        /// Recipient.
        peer_id: PeerId,
        /// The cached message.
        message: ChatMessage,
    },
    /// Unread counter for a peer changed.
    UnreadUpdate {
        /// Counterpart.
        peer_id: PeerId,
        /// New counter value.
        count: u32,
    },
    /// Outbound frame could not be sent.
    SendError {
        /// Reason.
        error: String,
    },
    /// Cache and counters were cleared.
    MessagesCleared,
    /// `nueva_notificacion` frame, verbatim.
    NewNotification(Value),
    /// `notificacion_leida` frame, verbatim.
    NotificationRead(Value),
    /// Server greeting.
    ConnectionEstablished(ConnectionEstablished),
    /// Unread notification backlog.
    PendingNotifications(PendingNotifications),
    /// Mark-all-read confirmation.
    AllNotificationsRead(AllNotificationsRead),
    /// Server-reported protocol error.
    ServerError(ServerError),
}

impl ChatEvent {
    /// Kind used to route this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected(_) => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::Error(_) => EventKind::Error,
            Self::MaxReconnectReached => EventKind::MaxReconnectReached,
            Self::NewMessage { .. } => EventKind::NewMessage,
            Self::MessageSent { .. } => EventKind::MessageSent,
            Self::UnreadUpdate { .. } => EventKind::UnreadUpdate,
            Self::SendError { .. } => EventKind::SendError,
            Self::MessagesCleared => EventKind::MessagesCleared,
            Self::NewNotification(_) => EventKind::NewNotification,
            Self::NotificationRead(_) => EventKind::NotificationRead,
            Self::ConnectionEstablished(_) => EventKind::ConnectionEstablished,
            Self::PendingNotifications(_) => EventKind::PendingNotifications,
            Self::AllNotificationsRead(_) => EventKind::AllNotificationsRead,
            Self::ServerError(_) => EventKind::ServerError,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

#[derive(Default)]
struct Registry {
    callbacks: HashMap<EventKind, Vec<(SubscriptionId, Callback)>>,
    next_id: u64,
}

/// Subscriber registry keyed by [`EventKind`].
#[derive(Default)]
pub struct EventBus {
    registry: Mutex<Registry>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry();
        f.debug_struct("EventBus")
            .field("event_count", &registry.callbacks.len())
            .field(
                "total_callbacks",
                &registry.callbacks.values().map(Vec::len).sum::<usize>(),
            )
            .field("next_id", &registry.next_id)
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a closure for `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&ChatEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_callback(kind, Arc::new(callback))
    }

    /// Register a shared callback for `kind`.
    ///
    /// Keep a clone of the `Arc` to remove it later with
    /// [`Self::unsubscribe_callback`].
    pub fn subscribe_callback(&self, kind: EventKind, callback: Callback) -> SubscriptionId {
        let mut registry = self.registry();
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.callbacks.entry(kind).or_default().push((id, callback));
        log::debug!("[EventBus] Registered {} for '{}'", id, kind);
        id
    }

    /// Register a closure by event name (e.g. `"new_message"`).
    pub fn subscribe_named<F>(
        &self,
        name: &str,
        callback: F,
    ) -> Result<SubscriptionId, UnknownEventError>
    where
        F: Fn(&ChatEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let kind: EventKind = name.parse()?;
        Ok(self.subscribe(kind, callback))
    }

    /// Remove a registration. Returns `false` if it was not found.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let Some(callbacks) = registry.callbacks.get_mut(&kind) else {
            return false;
        };
        let Some(index) = callbacks.iter().position(|(sub, _)| *sub == id) else {
            return false;
        };
        callbacks.remove(index);
        log::debug!("[EventBus] Unregistered {} from '{}'", id, kind);
        true
    }

    /// Remove the first registration of `callback` for `kind`.
    ///
    /// Callbacks are compared by `Arc` identity.
    pub fn unsubscribe_callback(&self, kind: EventKind, callback: &Callback) -> bool {
        let mut registry = self.registry();
        let Some(callbacks) = registry.callbacks.get_mut(&kind) else {
            return false;
        };
        let Some(index) = callbacks.iter().position(|(_, cb)| Arc::ptr_eq(cb, callback)) else {
            return false;
        };
        let (id, _) = callbacks.remove(index);
        log::debug!("[EventBus] Unregistered {} from '{}'", id, kind);
        true
    }

    /// Whether anything is subscribed to `kind`.
    #[must_use]
    pub fn has_subscribers(&self, kind: EventKind) -> bool {
        self.registry()
            .callbacks
            .get(&kind)
            .is_some_and(|v| !v.is_empty())
    }

    /// Number of registrations for `kind`.
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry().callbacks.get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every subscriber of its kind.
    ///
    /// Returns how many callbacks completed without error.
    pub fn emit(&self, event: &ChatEvent) -> usize {
        let kind = event.kind();

        // Snapshot under the lock, invoke without it
        let callbacks: Vec<(SubscriptionId, Callback)> = {
            let registry = self.registry();
            match registry.callbacks.get(&kind) {
                Some(list) if !list.is_empty() => list.clone(),
                _ => {
                    log::trace!("[EventBus] No listeners for '{}'", kind);
                    return 0;
                }
            }
        };

        log::trace!(
            "[EventBus] Emitting '{}' to {} listener(s)",
            kind,
            callbacks.len()
        );

        let mut invoked = 0;
        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => invoked += 1,
                Ok(Err(e)) => {
                    log::warn!("[EventBus] Listener {} for '{}' failed: {:#}", id, kind, e)
                }
                Err(_) => log::error!("[EventBus] Listener {} for '{}' panicked", id, kind),
            }
        }
        invoked
    }
}
