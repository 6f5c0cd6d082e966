//! Renderer / audio-output boundary
//!
//! The UI layer hands the session a [`ConsumerProvider`]. For every remote
//! track the registry asks it for a [`ConsumerHandle`], which wraps whatever
//! the UI wants to do with frames (texture upload, audio buffer write). A
//! handle is released exactly once; frames arriving after that are dropped.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::media::frame::MediaFrame;
use crate::types::{Participant, Track};

/// Receives frames for one track
pub trait FrameConsumer: Send {
    /// Called once per frame, in arrival order
    fn on_frame(&mut self, frame: &MediaFrame);

    /// Called once when the consumer is released; frees textures/buffers
    fn on_release(&mut self) {}
}

struct FnConsumer<F>(F);

impl<F> FrameConsumer for FnConsumer<F>
where
    F: FnMut(&MediaFrame) + Send,
{
    fn on_frame(&mut self, frame: &MediaFrame) {
        (self.0)(frame)
    }
}

/// Shared, releasable reference to a [`FrameConsumer`]
///
/// The sink task holds one clone and the registry entry holds another; only
/// the registry releases it.
#[derive(Clone)]
pub struct ConsumerHandle {
    label: Arc<str>,
    inner: Arc<Mutex<Option<Box<dyn FrameConsumer>>>>,
}

impl ConsumerHandle {
    pub fn new(label: impl Into<String>, consumer: impl FrameConsumer + 'static) -> Self {
        Self {
            label: Arc::from(label.into()),
            inner: Arc::new(Mutex::new(Some(Box::new(consumer)))),
        }
    }

    /// Wrap a closure as a consumer with no release hook
    pub fn from_fn<F>(label: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&MediaFrame) + Send + 'static,
    {
        Self::new(label, FnConsumer(f))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Hand a frame to the consumer. Returns false if it was already released.
    pub fn deliver(&self, frame: &MediaFrame) -> bool {
        let mut guard = self.inner.lock();
        match guard.as_mut() {
            Some(consumer) => {
                consumer.on_frame(frame);
                true
            }
            None => false,
        }
    }

    /// Release the consumer. Returns true only for the call that released it.
    pub fn release(&self) -> bool {
        let taken = self.inner.lock().take();
        match taken {
            Some(mut consumer) => {
                consumer.on_release();
                tracing::trace!(consumer = %self.label, "Consumer released");
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().is_none()
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("label", &self.label)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Supplies consumers for subscribed remote tracks
pub trait ConsumerProvider: Send + Sync {
    /// Consumer for a remote video track (texture target)
    fn video_consumer(&self, track: &Track, participant: &Participant) -> ConsumerHandle;

    /// Consumer for a remote audio track (audio output)
    fn audio_consumer(&self, track: &Track, participant: &Participant) -> ConsumerHandle;
}

/// Provider that discards everything; useful for headless sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsumerProvider;

impl ConsumerProvider for NullConsumerProvider {
    fn video_consumer(&self, track: &Track, _participant: &Participant) -> ConsumerHandle {
        ConsumerHandle::from_fn(format!("null-video-{}", track.sid), |_| {})
    }

    fn audio_consumer(&self, track: &Track, _participant: &Participant) -> ConsumerHandle {
        ConsumerHandle::from_fn(format!("null-audio-{}", track.sid), |_| {})
    }
}
