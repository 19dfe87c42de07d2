//! Protocol and client constants for the realtime chat session.
//!
//! Groups the magic numbers of the notification socket in one place. Most of
//! these are defaults that [`crate::config::Config`] can override.

// Rust guideline compliant 2026-02

use std::time::Duration;

// ============================================================================
// Endpoint
// ============================================================================

/// Default realtime host when none is configured.
pub const DEFAULT_WS_HOST: &str = "localhost";

/// Default realtime port (the backend's ASGI server).
pub const DEFAULT_WS_PORT: u16 = 8000;

/// Path prefix of the per-profile notification socket.
///
/// The full path is `/ws/notificaciones/{perfil_id}/`.
pub const NOTIFICATIONS_PATH: &str = "/ws/notificaciones";

// ============================================================================
// Reconnection
// ============================================================================

/// Maximum automatic reconnection attempts before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base reconnection delay in milliseconds.
///
/// The delay for attempt `n` is `base * 2^n`, so the first retry waits 2s.
pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// Upper bound for a single reconnection delay in milliseconds.
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

// ============================================================================
// Keepalive
// ============================================================================

/// Default interval between application-level `ping` frames.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Messages
// ============================================================================

/// Display name stored on locally sent messages.
pub const LOCAL_SENDER_NAME: &str = "Yo";

/// Maximum message length enforced by chat input widgets.
///
/// The service itself does not reject longer bodies.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// `send_error` reason used when the socket is not open.
pub const NOT_CONNECTED_REASON: &str = "WebSocket no conectado";
