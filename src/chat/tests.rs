//! Tests for `ChatService` driven by a recording transport.

// Rust guideline compliant 2026-02

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::transport::TransportEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Open(ConnectionId, String),
    Send(ConnectionId, String),
    Close(ConnectionId),
    Schedule(TimerId, Duration),
    Cancel(TimerId),
}

#[derive(Default)]
struct MockTransport {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_sends: Arc<Mutex<bool>>,
}

impl Transport for MockTransport {
    fn open(&mut self, conn: ConnectionId, url: &str) {
        self.calls.lock().unwrap().push(Call::Open(conn, url.to_string()));
    }

    fn send(&mut self, conn: ConnectionId, text: String) -> anyhow::Result<()> {
        if *self.fail_sends.lock().unwrap() {
            anyhow::bail!("socket task for {conn} has exited");
        }
        self.calls.lock().unwrap().push(Call::Send(conn, text));
        Ok(())
    }

    fn close(&mut self, conn: ConnectionId) {
        self.calls.lock().unwrap().push(Call::Close(conn));
    }

    fn schedule_reconnect(&mut self, timer: TimerId, delay: Duration) {
        self.calls.lock().unwrap().push(Call::Schedule(timer, delay));
    }

    fn cancel_reconnect(&mut self, timer: TimerId) {
        self.calls.lock().unwrap().push(Call::Cancel(timer));
    }
}

struct Harness {
    service: ChatService,
    calls: Arc<Mutex<Vec<Call>>>,
    fail_sends: Arc<Mutex<bool>>,
    events: Arc<Mutex<Vec<ChatEvent>>>,
}

impl Harness {
    fn new() -> Self {
        let transport = MockTransport::default();
        let calls = Arc::clone(&transport.calls);
        let fail_sends = Arc::clone(&transport.fail_sends);
        let service = ChatService::new(ChatSettings::default(), Box::new(transport));

        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let events = Arc::clone(&events);
            service.on(kind, move |event| {
                events.lock().unwrap().push(event.clone());
                Ok(())
            });
        }

        Self {
            service,
            calls,
            fail_sends,
            events,
        }
    }

    /// Connect as profile 1 and complete the handshake.
    fn connected() -> Self {
        let h = Self::new();
        h.service.connect(PeerId(1), "tok");
        h.service.handle_transport_event(TransportEvent::Opened(h.last_open()));
        h.take_events();
        h.take_calls();
        h
    }

    fn take_events(&self) -> Vec<ChatEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn last_open(&self) -> ConnectionId {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|call| match call {
                Call::Open(conn, _) => Some(*conn),
                _ => None,
            })
            .expect("no socket opened")
    }

    fn last_timer(&self) -> (TimerId, Duration) {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|call| match call {
                Call::Schedule(timer, delay) => Some((*timer, *delay)),
                _ => None,
            })
            .expect("no reconnect scheduled")
    }

    fn opens(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| matches!(call, Call::Open(..)))
            .count()
    }
}

fn chat_frame(sender: serde_json::Value, body: &str) -> String {
    json!({
        "type": "chat.message",
        "remitente_id": sender,
        "remitente_nombre": "Ana",
        "mensaje": body,
        "timestamp": "2026-01-27T12:00:00Z",
    })
    .to_string()
}

// =========================================================================
// Connection lifecycle
// =========================================================================

#[test]
fn test_connect_opens_socket_with_profile_url() {
    let h = Harness::new();
    h.service.connect(PeerId(12), "abc");

    assert_eq!(h.service.connection_state(), ConnectionState::Connecting);
    assert_eq!(
        h.take_calls(),
        vec![Call::Open(
            ConnectionId(1),
            "ws://localhost:8000/ws/notificaciones/12/?token=abc".to_string()
        )]
    );
    assert!(!h.service.is_connected());
    assert!(h.take_events().is_empty());
}

#[test]
fn test_open_emits_connected_true() {
    let h = Harness::new();
    h.service.connect(PeerId(1), "tok");
    h.service.handle_transport_event(TransportEvent::Opened(h.last_open()));

    assert!(h.service.is_connected());
    assert_eq!(h.take_events(), vec![ChatEvent::Connected(true)]);
    assert_eq!(h.service.peer_identity(), Some(PeerId(1)));
}

#[test]
fn test_connect_while_connecting_is_noop() {
    let h = Harness::new();
    h.service.connect(PeerId(1), "tok");
    h.service.connect(PeerId(2), "other");

    assert_eq!(h.opens(), 1);
    assert_eq!(h.service.peer_identity(), Some(PeerId(1)));

    h.service.handle_transport_event(TransportEvent::Opened(ConnectionId(1)));
    assert_eq!(h.take_events(), vec![ChatEvent::Connected(true)]);
}

#[test]
fn test_connect_same_identity_while_open_is_noop() {
    let h = Harness::connected();
    h.service.connect(PeerId(1), "tok");

    assert!(h.take_calls().is_empty());
    assert!(h.take_events().is_empty());
    assert!(h.service.is_connected());
}

#[test]
fn test_connect_other_identity_tears_down_first() {
    let h = Harness::connected();
    h.service.connect(PeerId(2), "tok2");

    assert_eq!(
        h.take_calls(),
        vec![
            Call::Close(ConnectionId(1)),
            Call::Open(
                ConnectionId(2),
                "ws://localhost:8000/ws/notificaciones/2/?token=tok2".to_string()
            ),
        ]
    );
    assert_eq!(h.take_events(), vec![ChatEvent::Disconnected]);
    assert_eq!(h.service.connection_state(), ConnectionState::Connecting);

    // Close of the replaced socket arrives late
    h.service.handle_transport_event(TransportEvent::Closed(ConnectionId(1)));
    assert!(h.take_events().is_empty());
    assert_eq!(h.service.connection_state(), ConnectionState::Connecting);
}

#[test]
fn test_error_then_close() {
    let h = Harness::connected();
    h.service.handle_transport_event(TransportEvent::Error(ConnectionId(1), "reset".to_string()));

    assert!(!h.service.is_connected());
    assert_eq!(h.take_events(), vec![ChatEvent::Error("reset".to_string())]);
    assert!(h.take_calls().is_empty());

    h.service.handle_transport_event(TransportEvent::Closed(ConnectionId(1)));
    assert_eq!(h.take_events(), vec![ChatEvent::Connected(false)]);
    assert_eq!(
        h.take_calls(),
        vec![Call::Schedule(TimerId(1), Duration::from_millis(2_000))]
    );
}

#[test]
fn test_backoff_until_max_reconnect_reached() {
    let h = Harness::connected();
    h.service.handle_transport_event(TransportEvent::Closed(ConnectionId(1)));

    let mut delays = Vec::new();
    for _ in 0..5 {
        let (timer, delay) = h.last_timer();
        delays.push(delay.as_millis());
        h.service.handle_transport_event(TransportEvent::ReconnectDue(timer));
        assert_eq!(h.service.connection_state(), ConnectionState::Connecting);
        h.service.handle_transport_event(TransportEvent::Closed(h.last_open()));
    }

    assert_eq!(delays, vec![2_000, 4_000, 8_000, 16_000, 30_000]);
    assert_eq!(h.service.reconnect_attempts(), 5);

    let events = h.take_events();
    assert_eq!(events.last(), Some(&ChatEvent::MaxReconnectReached));
    assert_eq!(
        events
            .iter()
            .filter(|e| **e == ChatEvent::Connected(false))
            .count(),
        6
    );
    assert_eq!(h.service.connection_state(), ConnectionState::Closed);
    // Five retries after the initial socket
    assert_eq!(h.opens(), 5);
}

#[test]
fn test_explicit_connect_after_exhaustion_restores_retries() {
    let h = Harness::connected();
    h.service.handle_transport_event(TransportEvent::Closed(ConnectionId(1)));
    for _ in 0..5 {
        let (timer, _) = h.last_timer();
        h.service.handle_transport_event(TransportEvent::ReconnectDue(timer));
        h.service.handle_transport_event(TransportEvent::Closed(h.last_open()));
    }
    h.take_calls();

    h.service.connect(PeerId(1), "tok");
    assert_eq!(h.service.reconnect_attempts(), 0);
    h.service.handle_transport_event(TransportEvent::Closed(h.last_open()));
    assert_eq!(h.last_timer().1, Duration::from_millis(2_000));
}

#[test]
fn test_successful_reopen_resets_attempts() {
    let h = Harness::connected();
    h.service.handle_transport_event(TransportEvent::Closed(ConnectionId(1)));
    let (timer, _) = h.last_timer();
    h.service.handle_transport_event(TransportEvent::ReconnectDue(timer));
    assert_eq!(h.service.reconnect_attempts(), 1);

    h.service.handle_transport_event(TransportEvent::Opened(h.last_open()));
    assert_eq!(h.service.reconnect_attempts(), 0);
    assert!(h.service.is_connected());
}

#[test]
fn test_disconnect_cancels_pending_reconnect() {
    let h = Harness::connected();
    h.service.handle_transport_event(TransportEvent::Closed(ConnectionId(1)));
    let (timer, _) = h.last_timer();
    h.take_calls();
    h.take_events();

    h.service.disconnect();
    assert_eq!(h.take_calls(), vec![Call::Cancel(timer)]);
    assert_eq!(h.take_events(), vec![ChatEvent::Disconnected]);

    // Timer already in flight when cancelled
    h.service.handle_transport_event(TransportEvent::ReconnectDue(timer));
    assert_eq!(h.opens(), 0);
    assert_eq!(h.service.connection_state(), ConnectionState::Disconnected);
    assert_eq!(h.service.peer_identity(), None);
}

#[test]
fn test_stale_close_after_disconnect_is_ignored() {
    let h = Harness::connected();
    h.service.disconnect();
    assert_eq!(h.take_calls(), vec![Call::Close(ConnectionId(1))]);
    assert_eq!(h.take_events(), vec![ChatEvent::Disconnected]);

    h.service.handle_transport_event(TransportEvent::Closed(ConnectionId(1)));
    h.service.handle_transport_event(TransportEvent::Frame(
        ConnectionId(1),
        chat_frame(json!(5), "tarde"),
    ));

    assert!(h.take_events().is_empty());
    assert!(h.take_calls().is_empty());
    assert!(h.service.get_messages(PeerId(5)).is_empty());
}

#[test]
fn test_disconnect_when_idle_still_emits() {
    let h = Harness::new();
    h.service.disconnect();
    assert_eq!(h.take_events(), vec![ChatEvent::Disconnected]);
    assert!(h.take_calls().is_empty());
}

// =========================================================================
// Inbound frames
// =========================================================================

#[test]
fn test_inbound_chat_message_caches_and_counts() {
    let h = Harness::connected();
    h.service.handle_transport_event(TransportEvent::Frame(
        ConnectionId(1),
        chat_frame(json!("7"), "hola"),
    ));

    let cached = h.service.get_messages(PeerId(7));
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].body, "hola");
    assert_eq!(cached[0].sender_name, "Ana");
    assert!(!cached[0].is_mine);
    assert_eq!(h.service.get_unread_count(PeerId(7)), 1);

    let events = h.take_events();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        ChatEvent::NewMessage { peer_id: PeerId(7), message } if message.body == "hola"
    ));
    assert_eq!(
        events[1],
        ChatEvent::UnreadUpdate {
            peer_id: PeerId(7),
            count: 1
        }
    );
}

#[test]
fn test_inbound_without_timestamp_gets_local_time() {
    let h = Harness::connected();
    h.service.on_frame(r#"{"type":"chat.message","remitente_id":3,"mensaje":"x"}"#);

    let cached = h.service.get_messages(PeerId(3));
    assert_eq!(cached.len(), 1);
    assert!(chrono::DateTime::parse_from_rfc3339(&cached[0].timestamp).is_ok());
}

#[test]
fn test_malformed_and_unknown_frames_are_dropped() {
    let h = Harness::connected();
    h.service.on_frame("{not json");
    h.service.on_frame(r#"{"type":"presence.update","who":3}"#);
    h.service.on_frame(r#"{"type":"chat.message","remitente_id":"abc","mensaje":"x"}"#);
    h.service.on_frame(r#"{"mensaje":"no type"}"#);

    assert!(h.take_events().is_empty());
    assert!(h.service.get_all_unread_counts().is_empty());
    assert!(h.service.is_connected());
}

#[test]
fn test_pong_is_silent() {
    let h = Harness::connected();
    h.service.on_frame(r#"{"type":"pong","timestamp":"2026-01-27T12:00:00Z"}"#);
    assert!(h.take_events().is_empty());
}

#[test]
fn test_notifications_are_forwarded_verbatim() {
    let h = Harness::connected();
    let nueva = json!({
        "type": "nueva_notificacion",
        "notificacion": {"id": 4, "titulo": "Intruso"},
    });
    let leida = json!({
        "type": "notificacion_leida",
        "notificacion_id": 4,
        "perfil_nombre": "Luis",
    });
    h.service.on_frame(&nueva.to_string());
    h.service.on_frame(&leida.to_string());

    assert_eq!(
        h.take_events(),
        vec![
            ChatEvent::NewNotification(nueva),
            ChatEvent::NotificationRead(leida)
        ]
    );
}

#[test]
fn test_backend_status_frames() {
    let h = Harness::connected();
    h.service
        .on_frame(r#"{"type":"connection_established","perfil_id":1,"rol":"guardia","zonas":[]}"#);
    h.service
        .on_frame(r#"{"type":"notificaciones_pendientes","count":2,"notificaciones":[{},{}]}"#);
    h.service.on_frame(r#"{"type":"todas_leidas","count":2}"#);
    h.service.on_frame(r#"{"type":"error","message":"Tipo de mensaje no soportado"}"#);

    let kinds: Vec<EventKind> = h.take_events().iter().map(ChatEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::ConnectionEstablished,
            EventKind::PendingNotifications,
            EventKind::AllNotificationsRead,
            EventKind::ServerError,
        ]
    );
}

// =========================================================================
// Outbound
// =========================================================================

#[test]
fn test_send_while_disconnected_fails() {
    let h = Harness::new();
    assert!(!h.service.send_message(PeerId(2), "Luis", "hola"));

    assert_eq!(
        h.take_events(),
        vec![ChatEvent::SendError {
            error: "WebSocket no conectado".to_string()
        }]
    );
    assert!(h.service.get_messages(PeerId(2)).is_empty());
}

#[test]
fn test_send_while_connecting_fails() {
    let h = Harness::new();
    h.service.connect(PeerId(1), "tok");
    assert!(!h.service.send_message(PeerId(2), "Luis", "hola"));
    assert!(h.service.get_messages(PeerId(2)).is_empty());
}

#[test]
fn test_blank_body_is_rejected_silently() {
    let h = Harness::connected();
    assert!(!h.service.send_message(PeerId(2), "Luis", ""));
    assert!(!h.service.send_message(PeerId(2), "Luis", "   \n\t"));

    assert!(h.take_events().is_empty());
    assert!(h.take_calls().is_empty());
    assert!(h.service.get_messages(PeerId(2)).is_empty());
}

#[test]
fn test_send_transmits_and_echoes_locally() {
    let h = Harness::connected();
    assert!(h.service.send_message(PeerId(2), "Luis", "hola"));

    let calls = h.take_calls();
    let [Call::Send(conn, text)] = calls.as_slice() else {
        panic!("expected a single send, got {calls:?}");
    };
    assert_eq!(*conn, ConnectionId(1));
    let sent: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(
        sent,
        json!({
            "type": "chat.message",
            "destinatario_id": 2,
            "destinatario_nombre": "Luis",
            "mensaje": "hola"
        })
    );

    let cached = h.service.get_messages(PeerId(2));
    assert_eq!(cached.len(), 1);
    assert!(cached[0].is_mine);
    assert_eq!(cached[0].sender_name, "Yo");
    assert_eq!(cached[0].sender_id, PeerId(1));

    let events = h.take_events();
    assert!(matches!(
        events.as_slice(),
        [ChatEvent::MessageSent { peer_id: PeerId(2), message }] if message.body == "hola"
    ));
    // Own messages never count as unread
    assert_eq!(h.service.get_unread_count(PeerId(2)), 0);
}

#[test]
fn test_long_body_is_not_truncated() {
    let h = Harness::connected();
    let body = "a".repeat(crate::constants::MAX_MESSAGE_CHARS + 50);
    assert!(h.service.send_message(PeerId(2), "Luis", &body));
    assert_eq!(h.service.get_messages(PeerId(2))[0].body, body);
}

#[test]
fn test_transport_failure_reports_send_error() {
    let h = Harness::connected();
    *h.fail_sends.lock().unwrap() = true;

    assert!(!h.service.send_message(PeerId(2), "Luis", "hola"));
    let events = h.take_events();
    assert!(matches!(
        events.as_slice(),
        [ChatEvent::SendError { error }] if error.contains("has exited")
    ));
    assert!(h.service.get_messages(PeerId(2)).is_empty());
}

#[test]
fn test_notification_commands() {
    let h = Harness::connected();
    assert!(h.service.mark_notification_read(41));
    assert!(h.service.mark_all_notifications_read());
    assert!(h.service.send_ping());

    let sent: Vec<serde_json::Value> = h
        .take_calls()
        .into_iter()
        .map(|call| match call {
            Call::Send(_, text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected call {other:?}"),
        })
        .collect();
    assert_eq!(sent[0], json!({"type": "marcar_leida", "notificacion_id": 41}));
    assert_eq!(sent[1], json!({"type": "marcar_todas_leidas"}));
    assert_eq!(sent[2]["type"], "ping");
    assert!(sent[2]["timestamp"].is_string());

    h.service.disconnect();
    h.take_events();
    assert!(!h.service.mark_all_notifications_read());
    assert_eq!(h.take_events().len(), 1);
}

// =========================================================================
// Cache surface
// =========================================================================

#[test]
fn test_hola_scenario_between_two_sessions() {
    let a = Harness::connected();
    let b = Harness::new();
    b.service.connect(PeerId(2), "tok-b");
    b.service.handle_transport_event(TransportEvent::Opened(b.last_open()));

    assert!(a.service.send_message(PeerId(2), "Luis", "hola"));

    // Relay the frame to B's socket
    let relayed = json!({
        "type": "chat.message",
        "remitente_id": 1,
        "remitente_nombre": "Ana",
        "mensaje": "hola",
        "timestamp": "2026-01-27T12:00:00Z",
    });
    b.service.handle_transport_event(TransportEvent::Frame(b.last_open(), relayed.to_string()));

    let mine = a.service.get_messages(PeerId(2));
    assert_eq!(mine.len(), 1);
    assert!(mine[0].is_mine);
    assert_eq!(mine[0].body, "hola");

    let theirs = b.service.get_messages(PeerId(1));
    assert_eq!(theirs.len(), 1);
    assert!(!theirs[0].is_mine);
    assert_eq!(b.service.get_unread_count(PeerId(1)), 1);
}

#[test]
fn test_mark_as_read_always_emits_zero() {
    let h = Harness::connected();
    h.service.on_frame(&chat_frame(json!(3), "uno"));
    h.service.on_frame(&chat_frame(json!(3), "dos"));
    assert_eq!(h.service.get_unread_count(PeerId(3)), 2);
    h.take_events();

    h.service.mark_as_read(PeerId(3));
    h.service.mark_as_read(PeerId(99));

    assert_eq!(h.service.get_unread_count(PeerId(3)), 0);
    assert_eq!(
        h.take_events(),
        vec![
            ChatEvent::UnreadUpdate {
                peer_id: PeerId(3),
                count: 0
            },
            ChatEvent::UnreadUpdate {
                peer_id: PeerId(99),
                count: 0
            },
        ]
    );
    // Messages survive being marked read
    assert_eq!(h.service.get_messages(PeerId(3)).len(), 2);
}

#[test]
fn test_unread_counts_snapshot_and_total() {
    let h = Harness::connected();
    h.service.on_frame(&chat_frame(json!(3), "a"));
    h.service.on_frame(&chat_frame(json!(4), "b"));
    h.service.on_frame(&chat_frame(json!(4), "c"));

    let mut counts = h.service.get_all_unread_counts();
    assert_eq!(counts.get(&PeerId(4)), Some(&2));
    assert_eq!(h.service.total_unread(), 3);

    counts.clear();
    assert_eq!(h.service.get_unread_count(PeerId(3)), 1);
}

#[test]
fn test_clear_all_messages() {
    let h = Harness::connected();
    h.service.on_frame(&chat_frame(json!(3), "a"));
    assert!(h.service.send_message(PeerId(3), "Ana", "b"));
    h.take_events();

    h.service.clear_all_messages();

    assert!(h.service.get_messages(PeerId(3)).is_empty());
    assert_eq!(h.service.get_unread_count(PeerId(3)), 0);
    assert_eq!(h.service.total_unread(), 0);
    assert_eq!(h.take_events(), vec![ChatEvent::MessagesCleared]);
    assert!(h.service.is_connected());
}

// =========================================================================
// Subscribers
// =========================================================================

#[test]
fn test_callback_may_call_back_into_service() {
    let h = Harness::connected();
    let service = h.service.clone();
    h.service.on(EventKind::NewMessage, move |event| {
        if let ChatEvent::NewMessage { peer_id, .. } = event {
            // An open chat window marks the conversation read on arrival
            service.mark_as_read(*peer_id);
            let _ = service.get_messages(*peer_id);
        }
        Ok(())
    });

    h.service.on_frame(&chat_frame(json!(8), "hola"));

    assert_eq!(h.service.get_unread_count(PeerId(8)), 0);
    assert_eq!(h.service.get_messages(PeerId(8)).len(), 1);
}

#[test]
fn test_nested_mark_as_read_leaves_last_badge_at_zero() {
    let h = Harness::connected();
    let service = h.service.clone();
    h.service.on(EventKind::NewMessage, move |event| {
        if let ChatEvent::NewMessage { peer_id, .. } = event {
            service.mark_as_read(*peer_id);
        }
        Ok(())
    });

    h.service.on_frame(&chat_frame(json!(2), "hola"));

    let events = h.take_events();
    assert!(matches!(
        events.first(),
        Some(ChatEvent::NewMessage { peer_id: PeerId(2), .. })
    ));
    let badges: Vec<u32> = events
        .iter()
        .filter_map(|event| match event {
            ChatEvent::UnreadUpdate { count, .. } => Some(*count),
            _ => None,
        })
        .collect();
    // Arrival bumps the badge, then the nested read clears it
    assert_eq!(badges, vec![1, 0]);
    assert_eq!(badges.last().copied(), Some(h.service.get_unread_count(PeerId(2))));
}

#[test]
fn test_failing_subscriber_does_not_block_state_change() {
    let h = Harness::new();
    h.service.on(EventKind::Connected, |_| anyhow::bail!("render failed"));
    h.service.connect(PeerId(1), "tok");
    h.service.handle_transport_event(TransportEvent::Opened(h.last_open()));

    assert!(h.service.is_connected());
    assert_eq!(h.take_events(), vec![ChatEvent::Connected(true)]);
}

#[test]
fn test_off_stops_delivery() {
    let h = Harness::connected();
    let hits = Arc::new(Mutex::new(0));
    let hits_ref = Arc::clone(&hits);
    let id = h.service.on(EventKind::MessagesCleared, move |_| {
        *hits_ref.lock().unwrap() += 1;
        Ok(())
    });

    h.service.clear_all_messages();
    assert!(h.service.off(EventKind::MessagesCleared, id));
    h.service.clear_all_messages();

    assert_eq!(*hits.lock().unwrap(), 1);
}
