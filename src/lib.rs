//! Security Vision realtime client.
//!
//! Keeps the admin console's single notification socket alive, caches the
//! chat history and unread counters of the session, and fans every change out
//! to subscribers.
//!
//! # Architecture
//!
//! - **ChatService** - owns connection state, cache and event bus
//! - **Transport** - side-effect seam; `WsTransport` for real sockets
//! - **Runtime** - tokio pump that feeds transport events to the service
//!
//! # Modules
//!
//! - [`chat`] - the service, connection state machine and dispatch
//! - [`events`] - publish/subscribe bus
//! - [`cache`] - message history and unread counters
//! - [`protocol`] - wire frames
//! - [`config`] - configuration loading/saving
//!
//! # Example
//!
//! ```no_run
//! use secvision_chat::{runtime, ChatEvent, Config, EventKind, PeerId};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let handle = runtime::start(config.chat_settings(), config.keepalive_interval())?;
//! let chat = handle.service().clone();
//!
//! chat.on(EventKind::NewMessage, |event| {
//!     if let ChatEvent::NewMessage { peer_id, message } = event {
//!         println!("{peer_id}: {}", message.body);
//!     }
//!     Ok(())
//! });
//! chat.connect(PeerId(1), &config.token);
//! # handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

// Rust guideline compliant 2026-02

pub mod cache;
pub mod chat;
pub mod config;
pub mod constants;
pub mod events;
pub mod protocol;
pub mod runtime;
pub mod transport;
pub mod ws;

// Re-export commonly used types
pub use cache::ChatMessage;
pub use chat::{ChatService, ChatSettings, ConnectionState, Endpoint, ReconnectPolicy, SendError};
pub use config::Config;
pub use events::{ChatEvent, EventBus, EventKind, SubscriptionId};
pub use protocol::PeerId;
pub use runtime::RealtimeHandle;
pub use transport::{Transport, TransportEvent, WsTransport};
