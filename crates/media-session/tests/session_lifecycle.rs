//! Integration tests for connect/disconnect, remote tracks and data packets

mod common;

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use roomlink_media_session::{
    InMemoryTransport, InMemoryTransportConfig, MediaSession, NullConsumerProvider, Participant,
    RoomOptions, SessionConfig, SessionError, SessionEvent, SessionEventHandler, SessionState,
    Sid, StaticTokenProvider, Track, TrackKind, TransportError,
};

use common::{eventually, init_tracing, new_log, wait_for, RecordingProvider};

const URL: &str = "ws://localhost:7880";

fn session_with(transport: Arc<InMemoryTransport>, provider: Arc<RecordingProvider>) -> MediaSession {
    MediaSession::new(SessionConfig::default(), transport, provider)
}

#[tokio::test]
async fn test_connect_emits_single_connected_event() {
    init_tracing();
    let transport = InMemoryTransport::default_arc();
    let session = MediaSession::new(
        SessionConfig::default(),
        transport.clone(),
        Arc::new(NullConsumerProvider),
    );
    let mut events = session.subscribe_events();

    let room = session
        .connect(URL, "token", RoomOptions::default())
        .await
        .unwrap();
    assert_eq!(room.name, "testRoom");
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.room().map(|r| r.name), Some("testRoom".to_string()));

    session.disconnect().await.unwrap();
    let (_, seen) = wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;

    let connected = seen
        .iter()
        .filter(|e| matches!(e, SessionEvent::Connected { .. }))
        .count();
    assert_eq!(connected, 1);

    let transitions: Vec<(SessionState, SessionState)> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged {
                old_state,
                new_state,
                ..
            } => Some((*old_state, *new_state)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (SessionState::Disconnected, SessionState::Connecting),
            (SessionState::Connecting, SessionState::Connected),
            (SessionState::Connected, SessionState::Closing),
            (SessionState::Closing, SessionState::Disconnected),
        ]
    );
    assert_eq!(transport.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_empty_token_fails_then_reconnects() {
    init_tracing();
    let transport = InMemoryTransport::default_arc();
    let session = session_with(transport.clone(), RecordingProvider::new(&new_log()));

    let err = session
        .connect(URL, "", RoomOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Connect { .. }));
    assert!(err.is_transport_fatal());
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(transport.connect_calls(), 0);

    // Failed counts as a reset state
    session
        .connect(URL, "token", RoomOptions::default())
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_transport_connect_failure_moves_to_failed() {
    init_tracing();
    let transport = InMemoryTransport::default_arc();
    transport.fail_connect_with(Some(TransportError::Network("unreachable".into())));
    let session = session_with(transport.clone(), RecordingProvider::new(&new_log()));
    let mut events = session.subscribe_events();

    let err = session
        .connect(URL, "token", RoomOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Connect { .. }));
    assert_eq!(session.state(), SessionState::Failed);

    let (event, _) = wait_for(&mut events, |e| matches!(e, SessionEvent::Error { .. })).await;
    assert_eq!(event, SessionEvent::Error { error: err });

    // No automatic retry
    assert_eq!(transport.connect_calls(), 1);
}

#[tokio::test]
async fn test_connect_twice_is_invalid() {
    init_tracing();
    let session = session_with(InMemoryTransport::default_arc(), RecordingProvider::new(&new_log()));
    session.connect(URL, "token", RoomOptions::default()).await.unwrap();

    let err = session
        .connect(URL, "token", RoomOptions::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SessionError::InvalidState {
            operation: "connect".to_string(),
            state: SessionState::Connected,
        }
    );
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_disconnect_while_disconnected_is_invalid() {
    init_tracing();
    let session = session_with(InMemoryTransport::default_arc(), RecordingProvider::new(&new_log()));
    let err = session.disconnect().await.unwrap_err();
    assert_eq!(err.category(), "state");
}

#[tokio::test]
async fn test_subscribe_then_unsubscribe_releases_consumer_once() {
    init_tracing();
    let log = new_log();
    let provider = RecordingProvider::new(&log);
    let transport = InMemoryTransport::default_arc();
    let session = session_with(transport.clone(), provider.clone());
    let mut events = session.subscribe_events();
    session.connect(URL, "token", RoomOptions::default()).await.unwrap();

    let frames = transport
        .inject_track_subscribed(
            Track::remote("v1", "camera", TrackKind::Video),
            Participant::new("alice"),
        )
        .unwrap();
    let (event, _) = wait_for(&mut events, |e| matches!(e, SessionEvent::TrackSubscribed { .. })).await;
    assert_eq!(
        event,
        SessionEvent::TrackSubscribed {
            sid: Sid::from("v1"),
            kind: TrackKind::Video,
            participant_identity: "alice".to_string(),
        }
    );

    for ts in 0..3u64 {
        frames
            .send(roomlink_media_session::VideoFrame::new(2, 2, ts, bytes::Bytes::new()).into())
            .await
            .unwrap();
    }
    assert!(eventually(|| provider.frames() == 3).await);

    transport.inject_track_unsubscribed(&Sid::from("v1")).unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::TrackUnsubscribed { .. })).await;

    assert!(session.tracks().await.unwrap().is_empty());
    assert_eq!(*log.lock(), vec!["release:v1".to_string()]);

    let stats = session.registry_stats().await.unwrap();
    assert_eq!(stats.subscribed, 1);
    assert_eq!(stats.unsubscribed, 1);
    assert_eq!(stats.active, 0);
}

#[tokio::test]
async fn test_unsubscribe_before_subscribe_is_noop() {
    init_tracing();
    let log = new_log();
    let transport = InMemoryTransport::default_arc();
    let session = session_with(transport.clone(), RecordingProvider::new(&log));
    session.connect(URL, "token", RoomOptions::default()).await.unwrap();

    let ghost = Track::remote("ghost", "ghost", TrackKind::Audio);
    transport
        .inject_raw_event(roomlink_media_session::TransportEvent::TrackUnsubscribed {
            publication: roomlink_media_session::TrackPublication {
                sid: ghost.sid.clone(),
                name: ghost.name.clone(),
                kind: ghost.kind,
                source: Default::default(),
                mime_type: "audio/opus".to_string(),
                simulcasted: false,
                muted: false,
            },
            track: ghost,
            participant: Participant::new("bob"),
        })
        .unwrap();

    let mut stats = session.registry_stats().await.unwrap();
    for _ in 0..100 {
        if stats.ignored_unsubscribes > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        stats = session.registry_stats().await.unwrap();
    }
    assert_eq!(stats.ignored_unsubscribes, 1);
    assert_eq!(stats.active, 0);
    assert!(log.lock().is_empty());
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_data_packet_updates_status() {
    init_tracing();
    let transport = InMemoryTransport::default_arc();
    let session = session_with(transport.clone(), RecordingProvider::new(&new_log()));
    let mut events = session.subscribe_events();
    session.connect(URL, "token", RoomOptions::default()).await.unwrap();

    transport
        .inject_data("hello", Some(Participant::new("alice")), Some("chat"))
        .unwrap();

    let (data, _) = wait_for(&mut events, |e| matches!(e, SessionEvent::DataReceived { .. })).await;
    match data {
        SessionEvent::DataReceived { participant_identity, topic, payload, .. } => {
            assert_eq!(participant_identity.as_deref(), Some("alice"));
            assert_eq!(topic.as_deref(), Some("chat"));
            assert_eq!(&payload[..], b"hello");
        }
        other => panic!("unexpected event {:?}", other),
    }

    let (status, _) = wait_for(&mut events, |e| matches!(e, SessionEvent::Status { .. })).await;
    match status {
        SessionEvent::Status { text, .. } => {
            assert_eq!(text, "DataReceived: from alice, data hello")
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_transport_disconnect_tears_down_and_fails() {
    init_tracing();
    let log = new_log();
    let transport = InMemoryTransport::default_arc();
    let session = session_with(transport.clone(), RecordingProvider::new(&log));
    let mut events = session.subscribe_events();
    session.connect(URL, "token", RoomOptions::default()).await.unwrap();
    let epoch = session.epoch();

    let _a1 = transport
        .inject_track_subscribed(Track::remote("a1", "mic", TrackKind::Audio), Participant::new("alice"))
        .unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::TrackSubscribed { .. })).await;

    transport.inject_disconnect("server shutting down").unwrap();
    let (event, seen) = wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    assert_eq!(
        event,
        SessionEvent::Disconnected {
            reason: "server shutting down".to_string()
        }
    );
    assert!(seen.iter().any(|e| matches!(
        e,
        SessionEvent::Error {
            error: SessionError::TransportDisconnected { .. }
        }
    )));

    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.epoch() > epoch);
    assert!(session.room().is_none());
    assert_eq!(*log.lock(), vec!["release:a1".to_string()]);

    // Disconnect from Failed just resets
    session.disconnect().await.unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(transport.disconnect_calls(), 0);

    session.connect(URL, "token", RoomOptions::default()).await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_disconnect_during_connect_abandons_it() {
    init_tracing();
    let transport = InMemoryTransport::new(InMemoryTransportConfig {
        connect_delay: Duration::from_millis(200),
        ..Default::default()
    });
    let session = Arc::new(session_with(transport.clone(), RecordingProvider::new(&new_log())));

    let connecting = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(URL, "token", RoomOptions::default()).await })
    };
    assert!(eventually(|| session.state() == SessionState::Connecting).await);

    session.disconnect().await.unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);

    let err = connecting.await.unwrap().unwrap_err();
    assert_eq!(
        err,
        SessionError::Abandoned {
            operation: "connect".to_string()
        }
    );

    // The late connection is hung up rather than adopted
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(transport.connect_calls(), 1);
    assert!(!transport.is_connected());
    assert_eq!(session.state(), SessionState::Disconnected);
}

struct OrderedHandler {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SessionEventHandler for OrderedHandler {
    async fn on_state_changed(&self, old: SessionState, new: SessionState) {
        self.log.lock().push(format!("{}->{}", old, new));
    }

    async fn on_connected(&self, room_name: &str) {
        // Slow handler still sees events strictly in order
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.log.lock().push(format!("connected:{}", room_name));
    }

    async fn on_track_subscribed(&self, sid: &Sid, _kind: TrackKind, _participant: &str) {
        self.log.lock().push(format!("subscribed:{}", sid));
    }
}

#[tokio::test]
async fn test_handler_sees_connected_before_tracks() {
    init_tracing();
    let log = Arc::new(Mutex::new(Vec::new()));
    let transport = InMemoryTransport::loopback();
    let session = session_with(transport.clone(), RecordingProvider::new(&new_log()));
    session.add_handler(Arc::new(OrderedHandler { log: log.clone() }));
    let mut events = session.subscribe_events();

    session.connect(URL, "token", RoomOptions::default()).await.unwrap();
    let capture_log = new_log();
    session
        .publish_local(
            "microphone",
            common::source(TrackKind::Audio, "mic", 0.0, &capture_log),
            roomlink_media_session::TrackPublishOptions::microphone(64_000),
        )
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::TrackSubscribed { .. })).await;
    assert!(eventually(|| log.lock().len() >= 4).await);

    let log = log.lock().clone();
    assert_eq!(log[0], "disconnected->connecting");
    assert_eq!(log[1], "connecting->connected");
    assert_eq!(log[2], "connected:testRoom");
    assert!(log[3].starts_with("subscribed:TR_"));
    assert!(log[3].ends_with("_echo"));
}

/// Calls back into the session from inside its own callbacks
struct ReentrantHandler {
    session: OnceLock<Weak<MediaSession>>,
    seen: tokio::sync::mpsc::UnboundedSender<String>,
}

impl ReentrantHandler {
    fn session(&self) -> Option<Arc<MediaSession>> {
        self.session.get().and_then(Weak::upgrade)
    }
}

#[async_trait]
impl SessionEventHandler for ReentrantHandler {
    async fn on_connected(&self, _room_name: &str) {
        if let Some(session) = self.session() {
            let tracks = session.tracks().await.map(|t| t.len());
            let _ = self.seen.send(format!("tracks:{:?}", tracks));
        }
    }

    async fn on_track_subscribed(&self, sid: &Sid, _kind: TrackKind, _participant: &str) {
        if let Some(session) = self.session() {
            let stats = session.registry_stats().await.map(|s| s.active);
            let _ = self.seen.send(format!("{}:{:?}", sid, stats));
        }
    }
}

#[tokio::test]
async fn test_handler_may_call_back_into_session() {
    init_tracing();
    let transport = InMemoryTransport::default_arc();
    let session = Arc::new(session_with(transport.clone(), RecordingProvider::new(&new_log())));
    let (tx, mut seen) = tokio::sync::mpsc::unbounded_channel();
    let handler = Arc::new(ReentrantHandler {
        session: OnceLock::new(),
        seen: tx,
    });
    let _ = handler.session.set(Arc::downgrade(&session));
    session.add_handler(handler);

    tokio::time::timeout(
        Duration::from_secs(3),
        session.connect(URL, "token", RoomOptions::default()),
    )
    .await
    .expect("connect must not wait on its own handlers")
    .unwrap();
    let first = tokio::time::timeout(Duration::from_secs(3), seen.recv()).await.unwrap();
    assert_eq!(first.as_deref(), Some("tracks:Ok(0)"));

    let _v1 = transport
        .inject_track_subscribed(Track::remote("v1", "cam", TrackKind::Video), Participant::new("alice"))
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(3), seen.recv()).await.unwrap();
    assert_eq!(second.as_deref(), Some("v1:Ok(1)"));

    let stats = tokio::time::timeout(Duration::from_secs(1), session.registry_stats())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.subscribed, 1);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_join_uses_token_server_url() {
    init_tracing();
    let transport = InMemoryTransport::default_arc();
    let session = session_with(transport.clone(), RecordingProvider::new(&new_log()));

    let room = session
        .join(&StaticTokenProvider::new("tok").with_server_url("wss://rooms.example.test"))
        .await
        .unwrap();
    assert_eq!(room.name, "testRoom");

    let err = MediaSession::new(
        SessionConfig::default(),
        InMemoryTransport::default_arc(),
        Arc::new(NullConsumerProvider),
    )
    .join(&StaticTokenProvider::new(""))
    .await
    .unwrap_err();
    assert!(matches!(err, SessionError::TokenRetrieval { .. }));
}

#[tokio::test]
async fn test_shutdown_disconnects_and_stops_driver() {
    init_tracing();
    let log = new_log();
    let transport = InMemoryTransport::default_arc();
    let session = session_with(transport.clone(), RecordingProvider::new(&log));
    let mut events = session.subscribe_events();
    session.connect(URL, "token", RoomOptions::default()).await.unwrap();
    let _v1 = transport
        .inject_track_subscribed(Track::remote("v1", "cam", TrackKind::Video), Participant::new("alice"))
        .unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::TrackSubscribed { .. })).await;

    session.shutdown().await.unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(*log.lock(), vec!["release:v1".to_string()]);
    assert_eq!(transport.disconnect_calls(), 1);
    assert!(session.connect(URL, "token", RoomOptions::default()).await.is_err());

    // Second shutdown is a no-op
    session.shutdown().await.unwrap();
}
