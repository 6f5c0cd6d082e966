//! Raw media frames exchanged between capture devices, the transport and consumers

use bytes::Bytes;

use crate::types::TrackKind;

/// Default microphone sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// A decoded or captured video frame (I420 unless the producer says otherwise)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation in degrees to apply when rendering
    pub rotation: u16,
    pub timestamp_us: u64,
    pub data: Bytes,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, timestamp_us: u64, data: Bytes) -> Self {
        Self {
            width,
            height,
            rotation: 0,
            timestamp_us,
            data,
        }
    }
}

/// A block of interleaved 16-bit PCM samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp_us: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16, timestamp_us: u64) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            timestamp_us,
        }
    }

    /// Create a silent frame of `duration_ms`
    pub fn silent(sample_rate: u32, channels: u16, duration_ms: u32, timestamp_us: u64) -> Self {
        let len = (sample_rate as usize * duration_ms as usize / 1000) * channels as usize;
        Self::new(vec![0; len], sample_rate, channels, timestamp_us)
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let per_channel = self.samples.len() as u64 / self.channels as u64;
        per_channel * 1000 / self.sample_rate as u64
    }
}

/// Unit of work moved through adapters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFrame {
    Audio(AudioFrame),
    Video(VideoFrame),
}

impl MediaFrame {
    pub fn kind(&self) -> TrackKind {
        match self {
            MediaFrame::Audio(_) => TrackKind::Audio,
            MediaFrame::Video(_) => TrackKind::Video,
        }
    }

    pub fn timestamp_us(&self) -> u64 {
        match self {
            MediaFrame::Audio(frame) => frame.timestamp_us,
            MediaFrame::Video(frame) => frame.timestamp_us,
        }
    }
}

impl From<AudioFrame> for MediaFrame {
    fn from(frame: AudioFrame) -> Self {
        MediaFrame::Audio(frame)
    }
}

impl From<VideoFrame> for MediaFrame {
    fn from(frame: VideoFrame) -> Self {
        MediaFrame::Video(frame)
    }
}
