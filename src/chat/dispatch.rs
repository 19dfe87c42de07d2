//! Inbound frame handling.

// Rust guideline compliant 2026-02

use super::{ChatService, State};
use crate::cache::ChatMessage;
use crate::events::ChatEvent;
use crate::protocol::{decode_frame, timestamp_now, IncomingChat, InboundFrame};

impl ChatService {
    /// Process one raw text frame as if it arrived on the current socket.
    ///
    /// Frames that fail to decode are logged and dropped; nothing reaches
    /// subscribers and the cache is untouched.
    pub fn on_frame(&self, text: &str) {
        self.with_state(|state, events| state.dispatch_text(text, events));
    }
}

impl State {
    pub(super) fn dispatch_text(&mut self, text: &str, events: &mut Vec<ChatEvent>) {
        match decode_frame(text) {
            Ok(frame) => {
                log::debug!("[ChatService] <- {}", frame.kind());
                self.dispatch(frame, events);
            }
            Err(e) => log::warn!("[ChatService] Dropping frame: {}", e),
        }
    }

    fn dispatch(&mut self, frame: InboundFrame, events: &mut Vec<ChatEvent>) {
        match frame {
            InboundFrame::ChatMessage(chat) => self.receive_chat(chat, events),
            InboundFrame::NewNotification(raw) => events.push(ChatEvent::NewNotification(raw)),
            InboundFrame::NotificationRead(raw) => events.push(ChatEvent::NotificationRead(raw)),
            InboundFrame::Pong => log::debug!("[ChatService] Keepalive acknowledged"),
            InboundFrame::ConnectionEstablished(info) => {
                log::info!(
                    "[ChatService] Server accepted profile {} ({})",
                    info.perfil_id.map_or_else(|| "?".to_string(), |p| p.to_string()),
                    info.rol.as_deref().unwrap_or("sin rol")
                );
                events.push(ChatEvent::ConnectionEstablished(info));
            }
            InboundFrame::PendingNotifications(pending) => {
                log::info!("[ChatService] {} pending notification(s)", pending.count);
                events.push(ChatEvent::PendingNotifications(pending));
            }
            InboundFrame::AllNotificationsRead(done) => {
                events.push(ChatEvent::AllNotificationsRead(done));
            }
            InboundFrame::ServerError(err) => {
                log::warn!("[ChatService] Server error: {}", err.message);
                events.push(ChatEvent::ServerError(err));
            }
        }
    }

    fn receive_chat(&mut self, chat: IncomingChat, events: &mut Vec<ChatEvent>) {
        let peer = chat.remitente_id;
        let message = ChatMessage {
            sender_id: peer,
            sender_name: chat.remitente_nombre,
            body: chat.mensaje,
            timestamp: chat.timestamp.unwrap_or_else(timestamp_now),
            is_mine: false,
        };

        self.cache.push(peer, message.clone());
        let count = self.cache.increment_unread(peer);

        events.push(ChatEvent::NewMessage {
            peer_id: peer,
            message,
        });
        events.push(ChatEvent::UnreadUpdate {
            peer_id: peer,
            count,
        });
    }
}
