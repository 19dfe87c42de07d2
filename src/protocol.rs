//! Wire format of the notification socket.
//!
//! Every frame is a JSON object carrying a `type` discriminator. Inbound text
//! is turned into a closed [`InboundFrame`] enum by [`decode_frame`], which is
//! the only place that looks at the `type` string. Outbound frames are built
//! from [`OutboundFrame`] and serialized with serde.
//!
//! # Frames
//!
//! | Direction | `type` | Fields |
//! |---|---|---|
//! | in | `chat.message` | `remitente_id`, `remitente_nombre`, `mensaje`, `timestamp` |
//! | in | `nueva_notificacion` | `notificacion` |
//! | in | `notificacion_leida` | `notificacion_id`, `perfil_nombre`, `fecha_lectura` |
//! | in | `connection_established` | `perfil_id`, `rol`, `zonas`, `message` |
//! | in | `notificaciones_pendientes` | `count`, `notificaciones` |
//! | in | `todas_leidas` | `count` |
//! | in | `error` | `message` |
//! | in | `pong` | `timestamp` |
//! | out | `chat.message` | `destinatario_id`, `destinatario_nombre`, `mensaje` |
//! | out | `ping` | `timestamp` |
//! | out | `marcar_leida` | `notificacion_id` |
//! | out | `marcar_todas_leidas` | |
//!
//! # Peer identities
//!
//! The backend emits profile ids sometimes as JSON numbers and sometimes as
//! strings (they come from URL kwargs). [`PeerId`] accepts both and always
//! serializes as a number.

// Rust guideline compliant 2026-02

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Identity of a chat counterpart (backend profile id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PeerId(pub i64);

impl From<i64> for PeerId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PeerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(id) => Ok(Self(id)),
            Raw::Text(text) => text
                .parse()
                .map_err(|e| D::Error::custom(format!("invalid peer id {text:?}: {e}"))),
        }
    }
}

/// Errors produced while decoding an inbound frame.
///
/// None of these reach consumers; the dispatcher logs and drops the frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The text was not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The JSON value had no string `type` field.
    #[error("frame has no string `type` field")]
    MissingType,
    /// The `type` is not one this client understands.
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
    /// The `type` is known but the payload did not match it.
    #[error("invalid `{kind}` frame: {source}")]
    InvalidPayload {
        /// Frame type that failed to parse.
        kind: &'static str,
        /// Underlying serde error.
        source: serde_json::Error,
    },
}

/// A chat message pushed by another profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IncomingChat {
    /// Sending profile (canonicalized).
    pub remitente_id: PeerId,
    /// Sender display name.
    #[serde(default)]
    pub remitente_nombre: String,
    /// Message body.
    pub mensaje: String,
    /// ISO-8601 send time, when the server provided one.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Greeting sent by the server right after the socket is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ConnectionEstablished {
    /// Profile the server bound this socket to.
    #[serde(default)]
    pub perfil_id: Option<PeerId>,
    /// Role of that profile (e.g. `jefe_seguridad`).
    #[serde(default)]
    pub rol: Option<String>,
    /// Zones the profile is assigned to.
    #[serde(default)]
    pub zonas: Vec<String>,
    /// Human-readable greeting.
    #[serde(default)]
    pub message: Option<String>,
}

/// Backlog of unread notifications delivered on connect.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct PendingNotifications {
    /// Number of notifications in the backlog.
    #[serde(default)]
    pub count: u64,
    /// Serialized notifications, newest first.
    #[serde(default)]
    pub notificaciones: Vec<Value>,
}

/// Confirmation of a `marcar_todas_leidas` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct AllNotificationsRead {
    /// How many notifications were flipped to read.
    #[serde(default)]
    pub count: u64,
}

/// Protocol-level error reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ServerError {
    /// Server-provided description.
    #[serde(default)]
    pub message: String,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// `chat.message` from another profile.
    ChatMessage(IncomingChat),
    /// `nueva_notificacion`, kept verbatim.
    NewNotification(Value),
    /// `notificacion_leida`, kept verbatim.
    NotificationRead(Value),
    /// `pong` keepalive answer.
    Pong,
    /// `connection_established` greeting.
    ConnectionEstablished(ConnectionEstablished),
    /// `notificaciones_pendientes` backlog.
    PendingNotifications(PendingNotifications),
    /// `todas_leidas` confirmation.
    AllNotificationsRead(AllNotificationsRead),
    /// `error` reported by the server.
    ServerError(ServerError),
}

impl InboundFrame {
    /// Wire name of this frame's type, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatMessage(_) => "chat.message",
            Self::NewNotification(_) => "nueva_notificacion",
            Self::NotificationRead(_) => "notificacion_leida",
            Self::Pong => "pong",
            Self::ConnectionEstablished(_) => "connection_established",
            Self::PendingNotifications(_) => "notificaciones_pendientes",
            Self::AllNotificationsRead(_) => "todas_leidas",
            Self::ServerError(_) => "error",
        }
    }
}

/// Decode one text frame received from the socket.
///
/// Notification frames are returned verbatim so that consumers see exactly
/// what the server sent.
pub fn decode_frame(text: &str) -> Result<InboundFrame, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(FrameError::Malformed)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_owned();

    match kind.as_str() {
        "chat.message" => parse(value, "chat.message").map(InboundFrame::ChatMessage),
        // Older servers used the reversed spelling.
        "nueva_notificacion" | "notificacion_nueva" => Ok(InboundFrame::NewNotification(value)),
        "notificacion_leida" => Ok(InboundFrame::NotificationRead(value)),
        "pong" => Ok(InboundFrame::Pong),
        "connection_established" => {
            parse(value, "connection_established").map(InboundFrame::ConnectionEstablished)
        }
        "notificaciones_pendientes" => {
            parse(value, "notificaciones_pendientes").map(InboundFrame::PendingNotifications)
        }
        "todas_leidas" => parse(value, "todas_leidas").map(InboundFrame::AllNotificationsRead),
        "error" => parse(value, "error").map(InboundFrame::ServerError),
        _ => Err(FrameError::UnknownType(kind)),
    }
}

fn parse<T: DeserializeOwned>(value: Value, kind: &'static str) -> Result<T, FrameError> {
    serde_json::from_value(value).map_err(|source| FrameError::InvalidPayload { kind, source })
}

/// Frame sent from this client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    /// Chat message to another profile.
    #[serde(rename = "chat.message")]
    ChatMessage {
        /// Recipient profile.
        destinatario_id: PeerId,
        /// Recipient display name.
        destinatario_nombre: String,
        /// Message body.
        mensaje: String,
    },
    /// Keepalive check; the server answers with `pong`.
    #[serde(rename = "ping")]
    Ping {
        /// Echoed back in the `pong`.
        timestamp: String,
    },
    /// Mark one notification as read.
    #[serde(rename = "marcar_leida")]
    MarkNotificationRead {
        /// Notification to mark.
        notificacion_id: i64,
    },
    /// Mark every notification of this profile as read.
    #[serde(rename = "marcar_todas_leidas")]
    MarkAllNotificationsRead,
}

impl OutboundFrame {
    /// Wire name of this frame's type, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatMessage { .. } => "chat.message",
            Self::Ping { .. } => "ping",
            Self::MarkNotificationRead { .. } => "marcar_leida",
            Self::MarkAllNotificationsRead => "marcar_todas_leidas",
        }
    }

    /// Serialize to the JSON text sent on the socket.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Current UTC time as an ISO-8601 string with millisecond precision.
#[must_use]
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
