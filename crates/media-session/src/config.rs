//! Session configuration
//!
//! Defaults reproduce the reference room setup: a local server on port 7880,
//! the sandbox token endpoint, room `testRoom`, 30 fps camera published as VP8
//! at 512 kbps with simulcast, 64 kbps microphone audio.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureConfig;
use crate::error::{SessionError, SessionResult};
use crate::media::frame::DEFAULT_SAMPLE_RATE;
use crate::types::{EncodingParams, RoomOptions, TrackPublishOptions, TrackSource, VideoCodec};

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:7880";
pub const DEFAULT_TOKEN_SERVER_URL: &str =
    "https://cloud-api.livekit.io/api/sandbox/connection-details";
pub const DEFAULT_ROOM_NAME: &str = "testRoom";
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Camera publish defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoPublishConfig {
    pub max_bitrate: u64,
    pub codec: VideoCodec,
    pub simulcast: bool,
    /// Encoder frame-rate cap; falls back to the session frame rate
    pub max_framerate: Option<f64>,
}

impl Default for VideoPublishConfig {
    fn default() -> Self {
        Self {
            max_bitrate: 512_000,
            codec: VideoCodec::Vp8,
            simulcast: true,
            max_framerate: None,
        }
    }
}

/// Microphone publish defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioPublishConfig {
    pub max_bitrate: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioPublishConfig {
    fn default() -> Self {
        Self {
            max_bitrate: 64_000,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// Top-level configuration for a media session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Signaling server address (ws:// or wss://)
    pub server_url: String,
    /// Token endpoint queried with `?roomName=`
    pub token_server_url: String,
    /// Sent as `X-Sandbox-ID` when set
    pub sandbox_id: Option<String>,
    pub room_name: String,
    /// Target capture and pump rate
    pub frame_rate: u32,
    pub room: RoomOptions,
    pub video: VideoPublishConfig,
    pub audio: AudioPublishConfig,
    pub capture: CaptureConfig,
    pub token_timeout_ms: u64,
    pub disconnect_timeout_ms: u64,
    /// Broadcast channel capacity for session events
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            token_server_url: DEFAULT_TOKEN_SERVER_URL.to_string(),
            sandbox_id: None,
            room_name: DEFAULT_ROOM_NAME.to_string(),
            frame_rate: DEFAULT_FRAME_RATE,
            room: RoomOptions::default(),
            video: VideoPublishConfig::default(),
            audio: AudioPublishConfig::default(),
            capture: CaptureConfig::default(),
            token_timeout_ms: 10_000,
            disconnect_timeout_ms: 5_000,
            event_buffer: 1000,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    pub fn with_token_server_url(mut self, url: impl Into<String>) -> Self {
        self.token_server_url = url.into();
        self
    }

    pub fn with_sandbox_id(mut self, id: impl Into<String>) -> Self {
        self.sandbox_id = Some(id.into());
        self
    }

    pub fn with_room_name(mut self, name: impl Into<String>) -> Self {
        self.room_name = name.into();
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_video(mut self, video: VideoPublishConfig) -> Self {
        self.video = video;
        self
    }

    pub fn with_audio(mut self, audio: AudioPublishConfig) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_capture(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_millis(self.token_timeout_ms)
    }

    /// Publish options for the camera track
    pub fn video_publish_options(&self) -> TrackPublishOptions {
        TrackPublishOptions {
            encoding: EncodingParams::Video {
                max_bitrate: self.video.max_bitrate,
                max_framerate: self
                    .video
                    .max_framerate
                    .unwrap_or(self.frame_rate as f64),
                codec: self.video.codec,
                simulcast: self.video.simulcast,
            },
            source: TrackSource::Camera,
        }
    }

    /// Publish options for the microphone track
    pub fn audio_publish_options(&self) -> TrackPublishOptions {
        TrackPublishOptions::microphone(self.audio.max_bitrate)
    }

    pub fn validate(&self) -> SessionResult<()> {
        if !self.server_url.starts_with("ws://") && !self.server_url.starts_with("wss://") {
            return Err(SessionError::invalid_config(
                "server_url",
                format!("expected ws:// or wss:// url, got {:?}", self.server_url),
            ));
        }
        if !self.token_server_url.is_empty()
            && !self.token_server_url.starts_with("http://")
            && !self.token_server_url.starts_with("https://")
        {
            return Err(SessionError::invalid_config(
                "token_server_url",
                "expected http:// or https:// url",
            ));
        }
        if self.room_name.trim().is_empty() {
            return Err(SessionError::invalid_config("room_name", "must not be empty"));
        }
        if self.frame_rate == 0 || self.frame_rate > 120 {
            return Err(SessionError::invalid_config(
                "frame_rate",
                format!("{} is outside 1..=120", self.frame_rate),
            ));
        }
        if self.video.max_bitrate == 0 {
            return Err(SessionError::invalid_config("video.max_bitrate", "must be positive"));
        }
        if let Some(fps) = self.video.max_framerate {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(SessionError::invalid_config(
                    "video.max_framerate",
                    "must be a positive number",
                ));
            }
        }
        if self.audio.max_bitrate == 0 {
            return Err(SessionError::invalid_config("audio.max_bitrate", "must be positive"));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(SessionError::invalid_config(
                "audio",
                "sample_rate and channels must be positive",
            ));
        }
        if self.event_buffer == 0 {
            return Err(SessionError::invalid_config("event_buffer", "must be positive"));
        }
        self.capture.validate()
    }

    /// Parse and validate a TOML document; missing keys take defaults
    pub fn from_toml_str(s: &str) -> SessionResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| SessionError::invalid_config("toml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SessionResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SessionError::invalid_config("path", format!("{}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> SessionResult<String> {
        toml::to_string_pretty(self).map_err(|e| SessionError::internal(e.to_string()))
    }
}
