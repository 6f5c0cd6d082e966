//! Track, participant and publication types shared across the crate

use serde::{Deserialize, Serialize};

/// Stable unique identifier for a track
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sid(pub String);

impl Sid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh sid with the given prefix (`TR_`, `PA_`, `RM_`)
    pub fn generate(prefix: &str) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}{}", prefix, &id[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Sid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Sid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Sid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Whether the track is published by us or subscribed from a remote participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackDirection {
    Local,
    Remote,
}

/// Video codecs the transport can be asked to publish with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    Vp8,
    Vp9,
    H264,
    Av1,
}

impl VideoCodec {
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::Vp8 => "video/VP8",
            VideoCodec::Vp9 => "video/VP9",
            VideoCodec::H264 => "video/H264",
            VideoCodec::Av1 => "video/AV1",
        }
    }
}

/// What produced a published track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TrackSource {
    Camera,
    Microphone,
    ScreenShare,
    #[default]
    Unknown,
}

/// Kind-specific encoding parameters for a local track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EncodingParams {
    Audio {
        /// Maximum bitrate in bits per second
        max_bitrate: u64,
    },
    Video {
        /// Maximum bitrate in bits per second
        max_bitrate: u64,
        max_framerate: f64,
        codec: VideoCodec,
        simulcast: bool,
    },
}

impl EncodingParams {
    pub fn kind(&self) -> TrackKind {
        match self {
            EncodingParams::Audio { .. } => TrackKind::Audio,
            EncodingParams::Video { .. } => TrackKind::Video,
        }
    }

    pub fn max_bitrate(&self) -> u64 {
        match self {
            EncodingParams::Audio { max_bitrate } | EncodingParams::Video { max_bitrate, .. } => {
                *max_bitrate
            }
        }
    }

    /// VP8 video at the given bitrate and frame rate, simulcast on
    pub fn video(max_bitrate: u64, max_framerate: f64) -> Self {
        EncodingParams::Video {
            max_bitrate,
            max_framerate,
            codec: VideoCodec::Vp8,
            simulcast: true,
        }
    }

    pub fn audio(max_bitrate: u64) -> Self {
        EncodingParams::Audio { max_bitrate }
    }
}

/// Options passed to the transport when publishing a local track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPublishOptions {
    pub encoding: EncodingParams,
    pub source: TrackSource,
}

impl TrackPublishOptions {
    pub fn camera(max_bitrate: u64, max_framerate: f64) -> Self {
        Self {
            encoding: EncodingParams::video(max_bitrate, max_framerate),
            source: TrackSource::Camera,
        }
    }

    pub fn microphone(max_bitrate: u64) -> Self {
        Self {
            encoding: EncodingParams::audio(max_bitrate),
            source: TrackSource::Microphone,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.encoding.kind()
    }
}

/// One published or subscribed media stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub sid: Sid,
    pub name: String,
    pub kind: TrackKind,
    pub direction: TrackDirection,
    /// Only set for local tracks
    pub encoding: Option<EncodingParams>,
}

impl Track {
    pub fn remote(sid: impl Into<Sid>, name: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            sid: sid.into(),
            name: name.into(),
            kind,
            direction: TrackDirection::Remote,
            encoding: None,
        }
    }

    pub fn local(sid: Sid, name: impl Into<String>, encoding: EncodingParams) -> Self {
        Self {
            sid,
            name: name.into(),
            kind: encoding.kind(),
            direction: TrackDirection::Local,
            encoding: Some(encoding),
        }
    }
}

/// Metadata describing a published track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPublication {
    pub sid: Sid,
    pub name: String,
    pub kind: TrackKind,
    pub source: TrackSource,
    pub mime_type: String,
    pub simulcasted: bool,
    pub muted: bool,
}

/// A participant in the room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub sid: Sid,
    pub identity: String,
    pub name: Option<String>,
}

impl Participant {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            sid: Sid::generate("PA_"),
            identity: identity.into(),
            name: None,
        }
    }
}

/// Room joined by a successful connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub sid: Sid,
    pub name: String,
    pub local_participant: Participant,
}

/// Options handed to the transport on connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomOptions {
    /// Subscribe to remote tracks as soon as they are published
    pub auto_subscribe: bool,
    /// Let the server pick layer quality based on render size
    pub adaptive_stream: bool,
    /// Pause unused simulcast layers
    pub dynacast: bool,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            auto_subscribe: true,
            adaptive_stream: false,
            dynacast: false,
        }
    }
}

/// Delivery guarantee of a data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataPacketKind {
    Reliable,
    Lossy,
}
