//! Sink adapter: remote decoded frames → consumer
//!
//! The transport pushes frames for a subscribed track into a bounded channel.
//! The adapter drains it on its own task and hands each frame to the consumer
//! in arrival order. Once the consumer is released or the adapter is stopped,
//! remaining frames are dropped and counted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{SessionError, SessionResult};
use crate::media::consumer::ConsumerHandle;
use crate::media::frame::MediaFrame;
use crate::media::AdapterState;
use crate::transport::RemoteFrameReceiver;
use crate::types::{Sid, TrackKind};

/// Counters for one sink adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Delivery {
    stopped: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Delivery {
    fn deliver(&self, consumer: &ConsumerHandle, frame: &MediaFrame) -> bool {
        if !self.stopped.load(Ordering::Acquire) && consumer.deliver(frame) {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }
}

/// Binds a remote track's decoded output to a consumer
pub struct SinkAdapter {
    sid: Sid,
    kind: TrackKind,
    consumer: ConsumerHandle,
    delivery: Arc<Delivery>,
    state: AdapterState,
    task: Option<JoinHandle<()>>,
}

impl SinkAdapter {
    pub fn new(sid: Sid, kind: TrackKind, consumer: ConsumerHandle) -> Self {
        Self {
            sid,
            kind,
            consumer,
            delivery: Arc::new(Delivery::default()),
            state: AdapterState::Idle,
            task: None,
        }
    }

    pub fn sid(&self) -> &Sid {
        &self.sid
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn consumer(&self) -> &ConsumerHandle {
        &self.consumer
    }

    /// Attach to the transport's push source and start delivering
    pub fn start(&mut self, mut frames: RemoteFrameReceiver) -> SessionResult<()> {
        match self.state {
            AdapterState::Idle => {}
            AdapterState::Running => {
                return Err(SessionError::internal(format!(
                    "sink {} is already attached",
                    self.sid
                )))
            }
            AdapterState::Stopped => {
                return Err(SessionError::internal(format!("sink {} was stopped", self.sid)))
            }
        }

        let consumer = self.consumer.clone();
        let delivery = self.delivery.clone();
        let sid = self.sid.clone();
        self.task = Some(tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if !delivery.deliver(&consumer, &frame) && delivery.stopped.load(Ordering::Acquire)
                {
                    break;
                }
            }
            trace!(sid = %sid, "Remote frame source closed");
        }));
        self.state = AdapterState::Running;
        debug!(sid = %self.sid, kind = %self.kind, consumer = %self.consumer.label(), "Sink adapter started");
        Ok(())
    }

    /// Deliver a frame directly, bypassing the push channel
    pub fn on_frame(&self, frame: &MediaFrame) -> bool {
        self.delivery.deliver(&self.consumer, frame)
    }

    /// Detach from the push source. Queued frames are dropped with the receiver.
    pub fn stop(&mut self) {
        if self.state == AdapterState::Stopped {
            return;
        }
        self.delivery.stopped.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.state = AdapterState::Stopped;
        let stats = self.stats();
        debug!(
            sid = %self.sid,
            delivered = stats.delivered,
            dropped = stats.dropped,
            "Sink adapter stopped"
        );
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            delivered: self.delivery.delivered.load(Ordering::Relaxed),
            dropped: self.delivery.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SinkAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SinkAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkAdapter")
            .field("sid", &self.sid)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("consumer", &self.consumer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::frame::AudioFrame;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn frame(ts: u64) -> MediaFrame {
        MediaFrame::Audio(AudioFrame::silent(48_000, 1, 10, ts))
    }

    #[tokio::test]
    async fn test_frames_delivered_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let consumer = ConsumerHandle::from_fn("ordered", move |f: &MediaFrame| {
            sink_seen.lock().push(f.timestamp_us());
        });

        let (tx, rx) = mpsc::channel(16);
        let mut sink = SinkAdapter::new(Sid::from("a1"), TrackKind::Audio, consumer);
        sink.start(rx).unwrap();

        for ts in 0..5 {
            tx.send(frame(ts)).await.unwrap();
        }
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.lock().len() < 5 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("frames delivered");

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(sink.stats().delivered, 5);
    }

    #[test]
    fn test_released_consumer_drops_frames() {
        let consumer = ConsumerHandle::from_fn("released", |_| {});
        let sink = SinkAdapter::new(Sid::from("v1"), TrackKind::Video, consumer.clone());

        assert!(sink.on_frame(&frame(1)));
        consumer.release();
        assert!(!sink.on_frame(&frame(2)));

        assert_eq!(sink.stats(), SinkStats { delivered: 1, dropped: 1 });
    }

    #[tokio::test]
    async fn test_stop_closes_push_source() {
        let consumer = ConsumerHandle::from_fn("closing", |_| {});
        let (tx, rx) = mpsc::channel(4);
        let mut sink = SinkAdapter::new(Sid::from("v2"), TrackKind::Video, consumer);
        sink.start(rx).unwrap();
        sink.stop();
        sink.stop();

        tokio::time::timeout(Duration::from_secs(1), tx.closed())
            .await
            .expect("receiver dropped after stop");
        assert_eq!(sink.state(), AdapterState::Stopped);
        assert!(!sink.on_frame(&frame(0)));
    }
}
