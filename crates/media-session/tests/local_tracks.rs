//! Integration tests for local publish/unpublish and session teardown

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roomlink_media_session::{
    open_camera, AdapterState, CameraDevice, CameraProvider, CaptureConfig, CaptureRequest,
    CaptureSource, InMemoryTransport, InMemoryTransportConfig, MediaSession, Participant,
    RoomOptions, SessionConfig, SessionError, SessionEvent, SessionResult, SessionState, Track,
    TrackKind, TrackPublishOptions,
};

use common::{init_tracing, new_log, source, unopened_source, wait_for, Log, RecordingProvider};

const URL: &str = "ws://localhost:7880";

async fn connected(transport: Arc<InMemoryTransport>, log: &Log) -> MediaSession {
    let session = MediaSession::new(
        SessionConfig::default(),
        transport,
        RecordingProvider::new(log),
    );
    session
        .connect(URL, "token", RoomOptions::default())
        .await
        .unwrap();
    session
}

#[tokio::test]
async fn test_publish_while_disconnected_fails() {
    init_tracing();
    let log = new_log();
    let session = MediaSession::new(
        SessionConfig::default(),
        InMemoryTransport::default_arc(),
        RecordingProvider::new(&log),
    );

    let err = session
        .publish_local(
            "camera",
            source(TrackKind::Video, "cam", 30.0, &log),
            TrackPublishOptions::camera(512_000, 30.0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Publish { .. }));
    assert_eq!(session.state(), SessionState::Disconnected);
    // The rejected source was released
    assert_eq!(*log.lock(), vec!["close:cam".to_string()]);
}

#[tokio::test]
async fn test_published_source_pumps_frames() {
    init_tracing();
    let log = new_log();
    let transport = InMemoryTransport::default_arc();
    let session = connected(transport.clone(), &log).await;
    let mut events = session.subscribe_events();

    let sid = session
        .publish_local(
            "microphone",
            source(TrackKind::Audio, "mic", 100.0, &log),
            TrackPublishOptions::microphone(64_000),
        )
        .await
        .unwrap();
    assert!(sid.as_str().starts_with("TR_"));
    assert_eq!(transport.published_sids(), vec![sid.clone()]);

    let (event, _) =
        wait_for(&mut events, |e| matches!(e, SessionEvent::LocalTrackPublished { .. })).await;
    assert_eq!(
        event,
        SessionEvent::LocalTrackPublished {
            sid: sid.clone(),
            kind: TrackKind::Audio
        }
    );

    assert!(common::eventually(|| transport.submitted_frames(&sid) >= 3).await);

    let tracks = session.tracks().await.unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].adapter_state, AdapterState::Running);
    assert!(tracks[0].source_stats.unwrap().frames_sent >= 3);
}

#[tokio::test]
async fn test_publish_rejections_keep_session_connected() {
    init_tracing();
    let log = new_log();
    let transport = InMemoryTransport::default_arc();
    let session = connected(transport.clone(), &log).await;

    // Encoding kind does not match the source
    let err = session
        .publish_local(
            "camera",
            source(TrackKind::Video, "cam", 0.0, &log),
            TrackPublishOptions::microphone(64_000),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Publish { .. }));

    // Capture never opened
    let err = session
        .publish_local(
            "camera",
            unopened_source(TrackKind::Video, "dead-cam", &log),
            TrackPublishOptions::camera(512_000, 30.0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::CaptureUnavailable { .. }));
    assert!(err.is_recoverable());

    // Transport refuses the encoding
    let err = session
        .publish_local(
            "camera",
            source(TrackKind::Video, "greedy-cam", 0.0, &log),
            TrackPublishOptions::camera(50_000_000, 30.0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Publish { .. }));

    // Frame rate too high to schedule a pump task
    let err = session
        .publish_local(
            "camera",
            source(TrackKind::Video, "runaway-cam", f64::INFINITY, &log),
            TrackPublishOptions::camera(512_000, 30.0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidConfiguration { .. }));

    assert_eq!(session.state(), SessionState::Connected);
    assert!(session.tracks().await.unwrap().is_empty());
    assert!(transport.published_sids().is_empty());
    assert_eq!(
        *log.lock(),
        vec!["close:cam", "close:dead-cam", "close:greedy-cam", "close:runaway-cam"]
    );
}

#[tokio::test]
async fn test_unpublish_local() {
    init_tracing();
    let log = new_log();
    let transport = InMemoryTransport::default_arc();
    let session = connected(transport.clone(), &log).await;
    let mut events = session.subscribe_events();

    let sid = session
        .publish_local(
            "microphone",
            source(TrackKind::Audio, "mic", 0.0, &log),
            TrackPublishOptions::microphone(64_000),
        )
        .await
        .unwrap();

    session.unpublish_local(&sid).await.unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::LocalTrackUnpublished { .. })).await;
    assert!(transport.published_sids().is_empty());
    assert_eq!(*log.lock(), vec!["close:mic".to_string()]);

    let err = session.unpublish_local(&sid).await.unwrap_err();
    assert!(matches!(err, SessionError::Publish { .. }));
}

#[tokio::test]
async fn test_publish_in_flight_during_disconnect_is_abandoned() {
    init_tracing();
    let log = new_log();
    let transport = InMemoryTransport::new(InMemoryTransportConfig {
        publish_delay: Duration::from_millis(200),
        ..Default::default()
    });
    let session = Arc::new(connected(transport.clone(), &log).await);

    let publishing = {
        let session = session.clone();
        let capture = source(TrackKind::Video, "cam", 30.0, &log);
        tokio::spawn(async move {
            session
                .publish_local("camera", capture, TrackPublishOptions::camera(512_000, 30.0))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.disconnect().await.unwrap();

    let err = publishing.await.unwrap().unwrap_err();
    assert_eq!(
        err,
        SessionError::Abandoned {
            operation: "publish".to_string()
        }
    );
    assert_eq!(*log.lock(), vec!["close:cam".to_string()]);

    // Let the late acknowledgment land
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(session.tracks().await.unwrap().is_empty());
    assert!(transport.published_sids().is_empty());
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_set_paused_reaches_local_sources() {
    init_tracing();
    let log = new_log();
    let session = connected(InMemoryTransport::default_arc(), &log).await;
    let mut events = session.subscribe_events();

    session
        .publish_local(
            "microphone",
            source(TrackKind::Audio, "mic", 0.0, &log),
            TrackPublishOptions::microphone(64_000),
        )
        .await
        .unwrap();

    assert_eq!(session.set_paused(true).await.unwrap(), 1);
    let (status, _) = wait_for(&mut events, |e| matches!(e, SessionEvent::Status { text, .. } if text == "Capture paused")).await;
    assert!(matches!(status, SessionEvent::Status { .. }));
    assert_eq!(session.set_paused(false).await.unwrap(), 1);

    // Pausing never tears anything down
    assert_eq!(session.tracks().await.unwrap().len(), 1);
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_disconnect_teardown_order() {
    init_tracing();
    let log = new_log();
    let transport = InMemoryTransport::default_arc();
    let session = connected(transport.clone(), &log).await;
    let mut events = session.subscribe_events();

    session
        .publish_local(
            "camera",
            source(TrackKind::Video, "cam", 0.0, &log),
            TrackPublishOptions::camera(512_000, 30.0),
        )
        .await
        .unwrap();
    let _v1 = transport
        .inject_track_subscribed(Track::remote("v1", "cam", TrackKind::Video), Participant::new("alice"))
        .unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::TrackSubscribed { .. })).await;

    session
        .publish_local(
            "microphone",
            source(TrackKind::Audio, "mic", 0.0, &log),
            TrackPublishOptions::microphone(64_000),
        )
        .await
        .unwrap();
    let _a1 = transport
        .inject_track_subscribed(Track::remote("a1", "mic", TrackKind::Audio), Participant::new("alice"))
        .unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::TrackSubscribed { .. })).await;

    session.disconnect().await.unwrap();
    assert_eq!(
        *log.lock(),
        vec!["release:a1", "close:mic", "release:v1", "close:cam"]
    );
    assert!(session.tracks().await.unwrap().is_empty());

    let stats = session.registry_stats().await.unwrap();
    assert_eq!(stats.torn_down, 4);
}

#[tokio::test]
async fn test_loopback_round_trip() {
    init_tracing();
    let log = new_log();
    let provider = RecordingProvider::new(&log);
    let transport = InMemoryTransport::loopback();
    let session = MediaSession::new(SessionConfig::default(), transport.clone(), provider.clone());
    session
        .connect(URL, "token", RoomOptions::default())
        .await
        .unwrap();

    session
        .publish_local(
            "camera",
            source(TrackKind::Video, "cam", 100.0, &log),
            TrackPublishOptions::camera(512_000, 30.0),
        )
        .await
        .unwrap();

    // Frames come back through the echo track into the recording consumer
    assert!(common::eventually(|| provider.frames() >= 3).await);
    let tracks = session.tracks().await.unwrap();
    assert_eq!(tracks.len(), 2);
    assert!(tracks
        .iter()
        .any(|t| t.participant_identity.as_deref() == Some("echo")));
}

/// A device list that never fills up
struct NoCameras;

#[async_trait]
impl CameraProvider for NoCameras {
    async fn request_permission(&self) -> bool {
        true
    }

    async fn devices(&self) -> Vec<CameraDevice> {
        Vec::new()
    }

    async fn open(
        &self,
        device: &CameraDevice,
        _request: &CaptureRequest,
    ) -> SessionResult<Box<dyn CaptureSource>> {
        Err(SessionError::capture_unavailable(format!("{} is gone", device.name)))
    }
}

#[tokio::test]
async fn test_missing_camera_leaves_session_untouched() {
    init_tracing();
    let log = new_log();
    let transport = InMemoryTransport::default_arc();
    let session = connected(transport.clone(), &log).await;
    let mut events = session.subscribe_events();

    session
        .publish_local(
            "microphone",
            source(TrackKind::Audio, "mic", 0.0, &log),
            TrackPublishOptions::microphone(64_000),
        )
        .await
        .unwrap();
    let _v1 = transport
        .inject_track_subscribed(Track::remote("v1", "cam", TrackKind::Video), Participant::new("alice"))
        .unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::TrackSubscribed { .. })).await;

    let epoch = session.epoch();
    let stats_before = session.registry_stats().await.unwrap();
    let mut sids_before: Vec<String> = session
        .tracks()
        .await
        .unwrap()
        .iter()
        .map(|t| t.track.sid.to_string())
        .collect();
    sids_before.sort();
    assert_eq!(sids_before.len(), 2);

    let wait = CaptureConfig {
        device_wait_frames: 5,
        poll_rate_hz: 1000,
    };
    let err = open_camera(&NoCameras, &CaptureRequest::for_screen(1280, 720, 30), &wait)
        .await
        .err().unwrap();
    assert_eq!(err, SessionError::NoCameraAvailable);
    assert!(err.is_recoverable());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.epoch(), epoch);
    assert!(transport.is_connected());

    let stats_after = session.registry_stats().await.unwrap();
    assert_eq!(stats_after.active, stats_before.active);
    assert_eq!(stats_after.torn_down, 0);
    let mut sids_after: Vec<String> = session
        .tracks()
        .await
        .unwrap()
        .iter()
        .map(|t| t.track.sid.to_string())
        .collect();
    sids_after.sort();
    assert_eq!(sids_after, sids_before);
    assert!(log.lock().is_empty());

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(
                event,
                SessionEvent::Error { .. }
                    | SessionEvent::Disconnected { .. }
                    | SessionEvent::StateChanged { .. }
                    | SessionEvent::TrackUnsubscribed { .. }
            ),
            "unexpected event {:?}",
            event
        );
    }
}
