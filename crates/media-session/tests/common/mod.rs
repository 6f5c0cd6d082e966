#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use roomlink_media_session::{
    AudioFrame, CaptureSource, ConsumerHandle, ConsumerProvider, FrameConsumer, MediaFrame,
    Participant, SessionEvent, SourceAdapter, Track, TrackKind, VideoFrame,
};
use tokio::sync::broadcast;

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("roomlink_media_session=debug")
        .with_test_writer()
        .try_init();
}

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// Capture that produces a frame on every pull and records when it is closed
pub struct SyntheticCapture {
    kind: TrackKind,
    label: String,
    open: bool,
    next_ts: u64,
    log: Log,
}

impl CaptureSource for SyntheticCapture {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn try_next_frame(&mut self) -> Option<MediaFrame> {
        self.next_ts += 10_000;
        Some(match self.kind {
            TrackKind::Audio => AudioFrame::silent(48_000, 1, 10, self.next_ts).into(),
            TrackKind::Video => {
                VideoFrame::new(4, 4, self.next_ts, Bytes::from_static(&[0u8; 24])).into()
            }
        })
    }

    fn close(&mut self) {
        self.log.lock().push(format!("close:{}", self.label));
    }
}

pub fn source(kind: TrackKind, label: &str, frame_rate: f64, log: &Log) -> SourceAdapter {
    SourceAdapter::new(
        Box::new(SyntheticCapture {
            kind,
            label: label.to_string(),
            open: true,
            next_ts: 0,
            log: log.clone(),
        }),
        frame_rate,
    )
}

pub fn unopened_source(kind: TrackKind, label: &str, log: &Log) -> SourceAdapter {
    SourceAdapter::new(
        Box::new(SyntheticCapture {
            kind,
            label: label.to_string(),
            open: false,
            next_ts: 0,
            log: log.clone(),
        }),
        0.0,
    )
}

struct RecordingConsumer {
    label: String,
    log: Log,
    frames: Arc<AtomicUsize>,
}

impl FrameConsumer for RecordingConsumer {
    fn on_frame(&mut self, _frame: &MediaFrame) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }

    fn on_release(&mut self) {
        self.log.lock().push(format!("release:{}", self.label));
    }
}

/// Hands out consumers that log their release and count frames
#[derive(Clone)]
pub struct RecordingProvider {
    pub log: Log,
    pub frames: Arc<AtomicUsize>,
}

impl RecordingProvider {
    pub fn new(log: &Log) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            frames: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    fn consumer(&self, track: &Track) -> ConsumerHandle {
        ConsumerHandle::new(
            track.sid.to_string(),
            RecordingConsumer {
                label: track.sid.to_string(),
                log: self.log.clone(),
                frames: self.frames.clone(),
            },
        )
    }
}

impl ConsumerProvider for RecordingProvider {
    fn video_consumer(&self, track: &Track, _participant: &Participant) -> ConsumerHandle {
        self.consumer(track)
    }

    fn audio_consumer(&self, track: &Track, _participant: &Participant) -> ConsumerHandle {
        self.consumer(track)
    }
}

/// Wait for the first event matching `pred`, collecting everything seen on the way
pub async fn wait_for<F>(
    rx: &mut broadcast::Receiver<SessionEvent>,
    mut pred: F,
) -> (SessionEvent, Vec<SessionEvent>)
where
    F: FnMut(&SessionEvent) -> bool,
{
    let mut seen = Vec::new();
    let found = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.expect("event stream open");
            if pred(&event) {
                return event;
            }
            seen.push(event);
        }
    })
    .await
    .expect("timed out waiting for session event");
    (found, seen)
}

/// Poll `cond` until it holds or two seconds pass
pub async fn eventually<F>(mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
