//! In-memory chat history and unread counters.
//!
//! [`MessageCache`] keeps, per counterpart, the ordered list of messages seen
//! during this session plus the number of inbound messages not yet marked as
//! read. Lists are append-only; the only way to drop entries is [`MessageCache::clear`].
//! Nothing here is persisted.

// Rust guideline compliant 2026-02

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::protocol::PeerId;

/// One message exchanged with a counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Profile that wrote the message (the local profile for sent messages).
    #[serde(rename = "remitenteId")]
    pub sender_id: PeerId,
    /// Sender display name; `"Yo"` for locally sent messages.
    #[serde(rename = "remitenteNombre")]
    pub sender_name: String,
    /// Message body.
    #[serde(rename = "mensaje")]
    pub body: String,
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// `true` when this client sent the message.
    #[serde(rename = "esMio")]
    pub is_mine: bool,
}

/// Per-peer message history and unread counters.
#[derive(Debug, Default)]
pub struct MessageCache {
    messages: HashMap<PeerId, Vec<ChatMessage>>,
    unread: HashMap<PeerId, u32>,
}

impl MessageCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to `peer`'s history.
    pub fn push(&mut self, peer: PeerId, message: ChatMessage) {
        self.messages.entry(peer).or_default().push(message);
    }

    /// Copy of `peer`'s history in insertion order.
    #[must_use]
    pub fn messages(&self, peer: PeerId) -> Vec<ChatMessage> {
        self.messages.get(&peer).cloned().unwrap_or_default()
    }

    /// Increment `peer`'s unread counter and return the new value.
    pub fn increment_unread(&mut self, peer: PeerId) -> u32 {
        let count = self.unread.entry(peer).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Reset `peer`'s unread counter to zero.
    pub fn reset_unread(&mut self, peer: PeerId) {
        self.unread.insert(peer, 0);
    }

    /// Unread count for `peer` (zero if never seen).
    #[must_use]
    pub fn unread(&self, peer: PeerId) -> u32 {
        self.unread.get(&peer).copied().unwrap_or(0)
    }

    /// Copy of every unread counter.
    #[must_use]
    pub fn all_unread(&self) -> HashMap<PeerId, u32> {
        self.unread.clone()
    }

    /// Sum of all unread counters.
    #[must_use]
    pub fn total_unread(&self) -> u64 {
        self.unread.values().map(|&c| u64::from(c)).sum()
    }

    /// Drop all history and counters.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.unread.clear();
    }
}
