//! Media frames and the adapters that move them
//!
//! - [`source::SourceAdapter`] pumps a local capture device into the transport
//! - [`sink::SinkAdapter`] drains a remote track into a consumer
//! - [`consumer`] is the boundary to renderers and audio outputs

pub mod consumer;
pub mod frame;
pub mod sink;
pub mod source;

pub use consumer::{ConsumerHandle, ConsumerProvider, FrameConsumer, NullConsumerProvider};
pub use frame::{AudioFrame, MediaFrame, VideoFrame, DEFAULT_SAMPLE_RATE};
pub use sink::{SinkAdapter, SinkStats};
pub use source::{CaptureSource, PumpOutcome, SourceAdapter, SourceStats};

/// Lifecycle of a source or sink adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterState {
    /// Created, not yet started
    Idle,
    /// Pumping or delivering frames
    Running,
    /// Stopped; cannot be restarted
    Stopped,
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterState::Idle => write!(f, "idle"),
            AdapterState::Running => write!(f, "running"),
            AdapterState::Stopped => write!(f, "stopped"),
        }
    }
}
