//! Capture device boundary
//!
//! Opening the camera follows the same sequence a mobile app goes through:
//! ask for permission, poll the device list until something shows up (devices
//! can take a few frames to enumerate after permission is granted), pick the
//! front-facing camera if there is one, and open it at a size derived from the
//! screen.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::media::source::CaptureSource;

/// Bounded device wait
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// How many polls to wait for a device list
    pub device_wait_frames: u32,
    /// Poll rate while waiting
    pub poll_rate_hz: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        // 300 frames at 60 Hz, about 5 s
        Self {
            device_wait_frames: 300,
            poll_rate_hz: 60,
        }
    }
}

impl CaptureConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.poll_rate_hz.max(1) as f64)
    }

    /// Upper bound on the device wait
    pub fn device_wait(&self) -> Duration {
        self.poll_interval() * self.device_wait_frames
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.device_wait_frames == 0 {
            return Err(SessionError::invalid_config(
                "capture.device_wait_frames",
                "must be positive",
            ));
        }
        if self.poll_rate_hz == 0 {
            return Err(SessionError::invalid_config("capture.poll_rate_hz", "must be positive"));
        }
        Ok(())
    }
}

/// A camera reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDevice {
    pub name: String,
    pub is_front_facing: bool,
}

impl CameraDevice {
    pub fn new(name: impl Into<String>, is_front_facing: bool) -> Self {
        Self {
            name: name.into(),
            is_front_facing,
        }
    }
}

/// First front-facing device, else the first device
pub fn select_camera(devices: &[CameraDevice]) -> Option<&CameraDevice> {
    devices
        .iter()
        .find(|d| d.is_front_facing)
        .or_else(|| devices.first())
}

/// Requested capture geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl CaptureRequest {
    /// Landscape capture sized from the screen: longer side is the width
    pub fn for_screen(screen_width: u32, screen_height: u32, frame_rate: u32) -> Self {
        Self {
            width: screen_width.max(screen_height),
            height: screen_width.min(screen_height),
            frame_rate,
        }
    }
}

/// Platform camera API
#[async_trait]
pub trait CameraProvider: Send + Sync {
    /// Returns false if the user or platform refused access
    async fn request_permission(&self) -> bool;

    /// Currently enumerated cameras; may be empty right after permission
    async fn devices(&self) -> Vec<CameraDevice>;

    async fn open(
        &self,
        device: &CameraDevice,
        request: &CaptureRequest,
    ) -> SessionResult<Box<dyn CaptureSource>>;
}

/// Request permission, wait for a camera, select and open it
pub async fn open_camera(
    provider: &dyn CameraProvider,
    request: &CaptureRequest,
    config: &CaptureConfig,
) -> SessionResult<(CameraDevice, Box<dyn CaptureSource>)> {
    if !provider.request_permission().await {
        warn!("Camera permission denied");
        return Err(SessionError::PermissionDenied {
            resource: "camera".to_string(),
        });
    }

    let mut ticker = tokio::time::interval(config.poll_interval());
    let mut devices = Vec::new();
    for attempt in 0..config.device_wait_frames {
        ticker.tick().await;
        devices = provider.devices().await;
        if !devices.is_empty() {
            debug!(attempt, count = devices.len(), "Camera devices enumerated");
            break;
        }
    }

    let device = select_camera(&devices)
        .cloned()
        .ok_or(SessionError::NoCameraAvailable)?;

    info!(
        device = %device.name,
        front_facing = device.is_front_facing,
        width = request.width,
        height = request.height,
        frame_rate = request.frame_rate,
        "Opening camera"
    );
    let capture = provider.open(&device, request).await?;
    if !capture.is_open() {
        return Err(SessionError::capture_unavailable(format!(
            "camera {} failed to start",
            device.name
        )));
    }
    Ok((device, capture))
}

/// A microphone reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicrophoneDevice {
    pub name: String,
}

/// Platform microphone API
#[async_trait]
pub trait MicrophoneProvider: Send + Sync {
    async fn request_permission(&self) -> bool {
        true
    }

    async fn devices(&self) -> Vec<MicrophoneDevice>;

    async fn open(
        &self,
        device: &MicrophoneDevice,
        sample_rate: u32,
    ) -> SessionResult<Box<dyn CaptureSource>>;
}

/// Open the first microphone at `sample_rate`
pub async fn open_microphone(
    provider: &dyn MicrophoneProvider,
    sample_rate: u32,
) -> SessionResult<(MicrophoneDevice, Box<dyn CaptureSource>)> {
    if !provider.request_permission().await {
        return Err(SessionError::PermissionDenied {
            resource: "microphone".to_string(),
        });
    }
    let device = provider
        .devices()
        .await
        .into_iter()
        .next()
        .ok_or_else(|| SessionError::capture_unavailable("no microphone device"))?;

    info!(device = %device.name, sample_rate, "Opening microphone");
    let capture = provider.open(&device, sample_rate).await?;
    Ok((device, capture))
}
