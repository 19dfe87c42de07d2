//! Tokio wiring for [`ChatService`].
//!
//! [`start`] builds a [`WsTransport`], wraps it in a service and spawns the
//! event pump: a single task that drains the transport channel in arrival
//! order and sends keepalive pings while the socket is open.
//!
//! ```text
//!   socket tasks ─┐
//!   timer tasks  ─┴─► mpsc<TransportEvent> ──► run_event_pump ──► ChatService
//!                                                   │
//!                                          keepalive tick ──► send_ping
//! ```

// Rust guideline compliant 2026-02

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatService, ChatSettings};
use crate::transport::{TransportEvent, WsTransport};

/// Running realtime client: the service plus its event pump.
///
/// Dropping the handle stops the pump; call [`RealtimeHandle::shutdown`] to
/// also close the socket and wait for the pump to exit.
#[derive(Debug)]
pub struct RealtimeHandle {
    service: ChatService,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl RealtimeHandle {
    /// The service driven by this handle.
    #[must_use]
    pub fn service(&self) -> &ChatService {
        &self.service
    }

    /// Disconnect, stop the pump and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.service.disconnect();
        self.cancel.cancel();
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                log::warn!("[Runtime] Event pump ended abnormally: {}", e);
            }
        }
        log::debug!("[Runtime] Shut down");
    }
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start a disconnected service on the current tokio runtime.
///
/// `keepalive` is the period between `ping` frames; `None` disables them.
pub fn start(settings: ChatSettings, keepalive: Option<Duration>) -> Result<RealtimeHandle> {
    let runtime = tokio::runtime::Handle::try_current()
        .context("realtime client must be started inside a tokio runtime")?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = WsTransport::new(events_tx, runtime.clone());
    let service = ChatService::new(settings, Box::new(transport));

    let cancel = CancellationToken::new();
    let pump = runtime.spawn(run_event_pump(
        service.clone(),
        events_rx,
        keepalive,
        cancel.clone(),
    ));

    Ok(RealtimeHandle {
        service,
        cancel,
        pump: Some(pump),
    })
}

/// Feed transport events into `service` until cancelled or the channel closes.
pub async fn run_event_pump(
    service: ChatService,
    mut events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    keepalive: Option<Duration>,
    cancel: CancellationToken,
) {
    let mut ticker = keepalive.map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    log::debug!("[Runtime] Event pump started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = events_rx.recv() => match event {
                Some(event) => service.handle_transport_event(event),
                None => break,
            },
            () = next_tick(ticker.as_mut()) => {
                if service.is_connected() {
                    service.send_ping();
                }
            }
        }
    }
    log::debug!("[Runtime] Event pump stopped");
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
