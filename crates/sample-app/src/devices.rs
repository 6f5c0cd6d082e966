//! Synthetic camera and microphone
//!
//! Stand-ins for platform capture APIs so the sample runs headless. The
//! camera paints a moving luma gradient, the microphone produces a 440 Hz tone.

use std::f32::consts::PI;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use roomlink_media_session::{
    AudioFrame, CameraDevice, CameraProvider, CaptureRequest, CaptureSource, MediaFrame,
    MicrophoneDevice, MicrophoneProvider, SessionResult, TrackKind, VideoFrame,
};
use tracing::debug;

pub struct SyntheticCamera {
    name: String,
    width: u32,
    height: u32,
    frame_interval_us: u64,
    started: Instant,
    last_frame_us: Option<u64>,
    paused: bool,
    open: bool,
}

impl SyntheticCamera {
    fn frame(&self, timestamp_us: u64) -> VideoFrame {
        let luma = (self.width * self.height) as usize;
        let chroma = luma / 2;
        let shift = (timestamp_us / 10_000) as usize;
        let mut data = Vec::with_capacity(luma + chroma);
        for y in 0..self.height as usize {
            for x in 0..self.width as usize {
                data.push(((x + y + shift) % 256) as u8);
            }
        }
        data.resize(luma + chroma, 128);
        VideoFrame::new(self.width, self.height, timestamp_us, Bytes::from(data))
    }
}

impl CaptureSource for SyntheticCamera {
    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn label(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn try_next_frame(&mut self) -> Option<MediaFrame> {
        if self.paused || !self.open {
            return None;
        }
        let now = self.started.elapsed().as_micros() as u64;
        if let Some(last) = self.last_frame_us {
            // Texture not updated since the last pull
            if now - last < self.frame_interval_us {
                return None;
            }
        }
        self.last_frame_us = Some(now);
        Some(self.frame(now).into())
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn close(&mut self) {
        if self.open {
            debug!(camera = %self.name, "Camera stopped");
        }
        self.open = false;
    }
}

/// Two cameras, the second one front-facing
pub struct SyntheticCameraProvider {
    /// Geometry is scaled down by this factor to keep the frames small
    pub downscale: u32,
}

impl Default for SyntheticCameraProvider {
    fn default() -> Self {
        Self { downscale: 8 }
    }
}

#[async_trait]
impl CameraProvider for SyntheticCameraProvider {
    async fn request_permission(&self) -> bool {
        true
    }

    async fn devices(&self) -> Vec<CameraDevice> {
        vec![
            CameraDevice::new("synthetic-back", false),
            CameraDevice::new("synthetic-front", true),
        ]
    }

    async fn open(
        &self,
        device: &CameraDevice,
        request: &CaptureRequest,
    ) -> SessionResult<Box<dyn CaptureSource>> {
        let scale = self.downscale.max(1);
        Ok(Box::new(SyntheticCamera {
            name: device.name.clone(),
            width: (request.width / scale).max(2) & !1,
            height: (request.height / scale).max(2) & !1,
            frame_interval_us: 1_000_000 / request.frame_rate.max(1) as u64,
            started: Instant::now(),
            last_frame_us: None,
            paused: false,
            open: true,
        }))
    }
}

pub struct ToneMicrophone {
    name: String,
    sample_rate: u32,
    phase: f32,
    timestamp_us: u64,
    paused: bool,
    open: bool,
}

impl ToneMicrophone {
    const FRAME_MS: u32 = 10;
    const FREQUENCY: f32 = 440.0;
}

impl CaptureSource for ToneMicrophone {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn label(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn try_next_frame(&mut self) -> Option<MediaFrame> {
        if self.paused || !self.open {
            return None;
        }
        let count = (self.sample_rate * Self::FRAME_MS / 1000) as usize;
        let step = 2.0 * PI * Self::FREQUENCY / self.sample_rate as f32;
        let mut samples = Vec::with_capacity(count);
        for _ in 0..count {
            samples.push((self.phase.sin() * i16::MAX as f32 * 0.2) as i16);
            self.phase = (self.phase + step) % (2.0 * PI);
        }
        let frame = AudioFrame::new(samples, self.sample_rate, 1, self.timestamp_us);
        self.timestamp_us += Self::FRAME_MS as u64 * 1000;
        Some(frame.into())
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn close(&mut self) {
        self.open = false;
    }
}

#[derive(Default)]
pub struct ToneMicrophoneProvider;

#[async_trait]
impl MicrophoneProvider for ToneMicrophoneProvider {
    async fn devices(&self) -> Vec<MicrophoneDevice> {
        vec![MicrophoneDevice {
            name: "synthetic-mic".to_string(),
        }]
    }

    async fn open(
        &self,
        device: &MicrophoneDevice,
        sample_rate: u32,
    ) -> SessionResult<Box<dyn CaptureSource>> {
        Ok(Box::new(ToneMicrophone {
            name: device.name.clone(),
            sample_rate,
            phase: 0.0,
            timestamp_us: 0,
            paused: false,
            open: true,
        }))
    }
}
