//! Source adapter: local capture device → outbound transport
//!
//! A [`SourceAdapter`] owns one [`CaptureSource`] and, once started, pulls at
//! most one frame per tick from it and hands the frame to the transport's
//! [`FrameSubmitter`]. Pulling never blocks: a tick with no frame ready is
//! skipped. With a positive frame rate the adapter drives its own ticks from a
//! tokio interval; with a frame rate of zero the host calls
//! [`SourceAdapter::pump_tick`] from its own frame loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::error::{SessionError, SessionResult};
use crate::media::consumer::ConsumerHandle;
use crate::media::frame::MediaFrame;
use crate::media::AdapterState;
use crate::transport::{FrameSubmitter, TransportError};
use crate::types::TrackKind;

/// Raw capture stream (camera texture, microphone ring buffer)
pub trait CaptureSource: Send {
    fn kind(&self) -> TrackKind;

    /// Device name, for logs
    fn label(&self) -> &str;

    /// Whether the device was successfully opened upstream
    fn is_open(&self) -> bool;

    /// Next captured frame if one is ready. Must not block.
    fn try_next_frame(&mut self) -> Option<MediaFrame>;

    /// Pause or resume the underlying device
    fn set_paused(&mut self, _paused: bool) {}

    /// Release the device. Called once the adapter stops.
    fn close(&mut self);
}

/// Result of one pump tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// A frame was forwarded to the transport
    Sent,
    /// No frame was ready, tick skipped
    Idle,
    /// Adapter is paused
    Paused,
    /// Adapter is not running
    Stopped,
    /// The transport refused the frame
    SubmitFailed,
}

/// Counters for one source adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_sent: u64,
    pub ticks_skipped: u64,
    pub ticks_paused: u64,
    pub submit_errors: u64,
}

#[derive(Default)]
struct Counters {
    frames_sent: AtomicU64,
    ticks_skipped: AtomicU64,
    ticks_paused: AtomicU64,
    submit_errors: AtomicU64,
}

struct PumpShared {
    kind: TrackKind,
    label: String,
    capture: Mutex<Box<dyn CaptureSource>>,
    submitter: Mutex<Option<Arc<dyn FrameSubmitter>>>,
    preview: Option<ConsumerHandle>,
    paused: AtomicBool,
    counters: Counters,
}

impl PumpShared {
    fn pump(&self) -> PumpOutcome {
        let Some(submitter) = self.submitter.lock().clone() else {
            return PumpOutcome::Stopped;
        };

        if self.paused.load(Ordering::Acquire) {
            self.counters.ticks_paused.fetch_add(1, Ordering::Relaxed);
            return PumpOutcome::Paused;
        }

        let Some(frame) = self.capture.lock().try_next_frame() else {
            self.counters.ticks_skipped.fetch_add(1, Ordering::Relaxed);
            return PumpOutcome::Idle;
        };

        if let Some(preview) = &self.preview {
            preview.deliver(&frame);
        }

        match submitter.submit(frame) {
            Ok(()) => {
                self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                PumpOutcome::Sent
            }
            Err(e) => {
                let errors = self.counters.submit_errors.fetch_add(1, Ordering::Relaxed) + 1;
                // Log the first failure and then every 100th to keep the frame loop quiet
                if errors == 1 || errors % 100 == 0 {
                    warn!(source = %self.label, error = %e, errors, "Frame submission failed");
                }
                if e == TransportError::Closed {
                    trace!(source = %self.label, "Transport closed under running source");
                }
                PumpOutcome::SubmitFailed
            }
        }
    }
}

/// Tick period for a frame rate; `None` means host-driven
fn pump_period(frame_rate: f64) -> SessionResult<Option<Duration>> {
    if frame_rate == 0.0 {
        return Ok(None);
    }
    if !frame_rate.is_finite() || frame_rate < 0.0 {
        return Err(SessionError::invalid_config(
            "frame_rate",
            format!("{} is not a usable frame rate", frame_rate),
        ));
    }
    match Duration::try_from_secs_f64(1.0 / frame_rate) {
        Ok(period) if !period.is_zero() => Ok(Some(period)),
        _ => Err(SessionError::invalid_config(
            "frame_rate",
            format!("{} ticks per second is too fast to schedule", frame_rate),
        )),
    }
}

/// Binds a capture stream to a local track
pub struct SourceAdapter {
    shared: Arc<PumpShared>,
    frame_rate: f64,
    state: AdapterState,
    pump_task: Option<JoinHandle<()>>,
}

impl SourceAdapter {
    /// Create an adapter pumping at `frame_rate` ticks per second (0 = host-driven)
    pub fn new(capture: Box<dyn CaptureSource>, frame_rate: f64) -> Self {
        let kind = capture.kind();
        let label = capture.label().to_string();
        Self {
            shared: Arc::new(PumpShared {
                kind,
                label,
                capture: Mutex::new(capture),
                submitter: Mutex::new(None),
                preview: None,
                paused: AtomicBool::new(false),
                counters: Counters::default(),
            }),
            frame_rate,
            state: AdapterState::Idle,
            pump_task: None,
        }
    }

    /// Mirror every forwarded frame to a local preview consumer
    pub fn with_preview(mut self, preview: ConsumerHandle) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.preview = Some(preview);
        }
        self
    }

    pub fn kind(&self) -> TrackKind {
        self.shared.kind
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    /// Check that the frame rate can drive a pump task
    pub fn validate(&self) -> SessionResult<()> {
        pump_period(self.frame_rate).map(|_| ())
    }

    pub fn is_capture_open(&self) -> bool {
        self.shared.capture.lock().is_open()
    }

    pub fn preview(&self) -> Option<&ConsumerHandle> {
        self.shared.preview.as_ref()
    }

    /// Begin pumping frames into `submitter`
    pub fn start(&mut self, submitter: Arc<dyn FrameSubmitter>) -> SessionResult<()> {
        match self.state {
            AdapterState::Running => return Ok(()),
            AdapterState::Stopped => {
                return Err(SessionError::capture_unavailable(format!(
                    "source {} was already stopped",
                    self.shared.label
                )))
            }
            AdapterState::Idle => {}
        }

        let period = pump_period(self.frame_rate)?;
        if !self.is_capture_open() {
            return Err(SessionError::capture_unavailable(format!(
                "capture device {} was not opened",
                self.shared.label
            )));
        }

        *self.shared.submitter.lock() = Some(submitter);

        if let Some(period) = period {
            let shared = self.shared.clone();
            self.pump_task = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if shared.pump() == PumpOutcome::Stopped {
                        break;
                    }
                }
            }));
        }

        self.state = AdapterState::Running;
        debug!(
            source = %self.shared.label,
            kind = %self.shared.kind,
            frame_rate = self.frame_rate,
            "Source adapter started"
        );
        Ok(())
    }

    /// Run one pump cycle. Non-blocking.
    pub fn pump_tick(&self) -> PumpOutcome {
        if self.state != AdapterState::Running {
            return PumpOutcome::Stopped;
        }
        self.shared.pump()
    }

    pub fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::AcqRel) {
            self.shared.capture.lock().set_paused(true);
            debug!(source = %self.shared.label, "Source paused");
        }
    }

    pub fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::AcqRel) {
            self.shared.capture.lock().set_paused(false);
            debug!(source = %self.shared.label, "Source resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Halt pumping and release the capture binding. Idempotent.
    pub fn stop(&mut self) {
        if self.state == AdapterState::Stopped {
            return;
        }
        if let Some(task) = self.pump_task.take() {
            task.abort();
        }
        self.shared.submitter.lock().take();
        self.shared.capture.lock().close();
        let was_running = self.state == AdapterState::Running;
        self.state = AdapterState::Stopped;
        debug!(source = %self.shared.label, was_running, "Source adapter stopped");
    }

    pub fn stats(&self) -> SourceStats {
        let c = &self.shared.counters;
        SourceStats {
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            ticks_skipped: c.ticks_skipped.load(Ordering::Relaxed),
            ticks_paused: c.ticks_paused.load(Ordering::Relaxed),
            submit_errors: c.submit_errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SourceAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SourceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceAdapter")
            .field("label", &self.shared.label)
            .field("kind", &self.shared.kind)
            .field("state", &self.state)
            .field("frame_rate", &self.frame_rate)
            .finish()
    }
}
