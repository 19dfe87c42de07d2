//! Frames sent by this client.
//!
//! Every operation here returns `bool` and never panics. A failed send emits
//! `send_error` with the reason and leaves the cache unchanged.

// Rust guideline compliant 2026-02

use super::{ChatService, ConnectionState, State};
use crate::cache::ChatMessage;
use crate::constants::{LOCAL_SENDER_NAME, NOT_CONNECTED_REASON};
use crate::events::ChatEvent;
use crate::protocol::{timestamp_now, OutboundFrame, PeerId};

/// Why an outbound frame was not transmitted.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The socket is not open.
    #[error("{}", NOT_CONNECTED_REASON)]
    NotConnected,
    /// The frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    /// The transport refused the frame.
    #[error("transport rejected frame: {0:#}")]
    Transport(anyhow::Error),
}

impl ChatService {
    /// Send a chat message to `peer` and append it to the local history.
    ///
    /// Returns `false` without emitting anything when `body` is blank. When
    /// the socket is not open, or the frame cannot be handed to the transport,
    /// returns `false` and emits `send_error`. On success the message is
    /// cached with `is_mine = true` and `message_sent` is emitted before the
    /// server has seen it.
    pub fn send_message(&self, peer: PeerId, peer_name: &str, body: &str) -> bool {
        if body.trim().is_empty() {
            log::debug!("[ChatService] Ignoring empty message to {}", peer);
            return false;
        }

        self.with_state(|state, events| {
            let frame = OutboundFrame::ChatMessage {
                destinatario_id: peer,
                destinatario_nombre: peer_name.to_string(),
                mensaje: body.to_string(),
            };
            let local = match state.transmit(&frame) {
                Ok(local) => local,
                Err(e) => {
                    report_send_failure(&frame, &e, events);
                    return false;
                }
            };

            let message = ChatMessage {
                sender_id: local,
                sender_name: LOCAL_SENDER_NAME.to_string(),
                body: body.to_string(),
                timestamp: timestamp_now(),
                is_mine: true,
            };
            state.cache.push(peer, message.clone());
            events.push(ChatEvent::MessageSent {
                peer_id: peer,
                message,
            });
            true
        })
    }

    /// Ask the server to mark notification `id` as read.
    ///
    /// The server answers with `notificacion_leida` to every session of the
    /// profile's company.
    pub fn mark_notification_read(&self, id: i64) -> bool {
        self.send_frame(&OutboundFrame::MarkNotificationRead {
            notificacion_id: id,
        })
    }

    /// Ask the server to mark every notification as read.
    pub fn mark_all_notifications_read(&self) -> bool {
        self.send_frame(&OutboundFrame::MarkAllNotificationsRead)
    }

    /// Send an application-level keepalive.
    pub fn send_ping(&self) -> bool {
        self.send_frame(&OutboundFrame::Ping {
            timestamp: timestamp_now(),
        })
    }

    fn send_frame(&self, frame: &OutboundFrame) -> bool {
        self.with_state(|state, events| match state.transmit(frame) {
            Ok(_) => true,
            Err(e) => {
                report_send_failure(frame, &e, events);
                false
            }
        })
    }
}

impl State {
    /// Encode `frame` and hand it to the open socket.
    ///
    /// Returns the local profile id the socket is bound to.
    fn transmit(&mut self, frame: &OutboundFrame) -> Result<PeerId, SendError> {
        let (ConnectionState::Open, Some(conn), Some(local)) =
            (self.connection, self.conn_id, self.peer)
        else {
            return Err(SendError::NotConnected);
        };

        let text = frame.encode()?;
        log::debug!("[ChatService] -> {}", frame.kind());
        self.transport
            .send(conn, text)
            .map_err(SendError::Transport)?;
        Ok(local)
    }
}

fn report_send_failure(frame: &OutboundFrame, error: &SendError, events: &mut Vec<ChatEvent>) {
    log::warn!("[ChatService] Could not send {}: {}", frame.kind(), error);
    events.push(ChatEvent::SendError {
        error: error.to_string(),
    });
}
