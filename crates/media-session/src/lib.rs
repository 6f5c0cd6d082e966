//! # roomlink-media-session
//!
//! Local media-session manager for a real-time communication room.
//!
//! The crate connects to a room through a [`MediaTransport`], keeps a registry
//! of local and remote tracks, pumps captured frames out through
//! [`SourceAdapter`]s and feeds decoded remote frames to consumers through
//! [`SinkAdapter`]s. All lifecycle callbacks are serialized onto one driver
//! task, so registry changes are never observed half-applied.
//!
//! ## Modules
//!
//! - [`session`]: the [`MediaSession`] handle and its driver
//! - [`registry`]: sid → track/adapter/consumer map
//! - [`media`]: frames, source/sink adapters and the consumer boundary
//! - [`transport`]: the media-engine boundary and an in-memory implementation
//! - [`capture`], [`token`]: device and token-server boundaries
//! - [`config`], [`logging`], [`error`]: configuration, tracing setup, errors

pub mod capture;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod logging;
pub mod media;
pub mod registry;
pub mod session;
pub mod state;
pub mod token;
pub mod transport;
pub mod types;

pub use capture::{
    open_camera, open_microphone, select_camera, CameraDevice, CameraProvider, CaptureConfig,
    CaptureRequest, MicrophoneDevice, MicrophoneProvider,
};
pub use config::{AudioPublishConfig, SessionConfig, VideoPublishConfig};
pub use error::{SessionError, SessionResult};
pub use events::{EventBus, EventPriority, SessionEvent, SessionEventHandler};
pub use logging::{setup_logging, LoggingConfig};
pub use media::{
    AdapterState, AudioFrame, CaptureSource, ConsumerHandle, ConsumerProvider, FrameConsumer,
    MediaFrame, NullConsumerProvider, PumpOutcome, SinkAdapter, SinkStats, SourceAdapter,
    SourceStats, VideoFrame,
};
pub use registry::{RegistryStats, TrackRegistry, TrackSnapshot};
pub use session::MediaSession;
pub use state::{SessionState, StateManager};
pub use token::{ConnectionDetails, HttpTokenProvider, StaticTokenProvider, TokenProvider};
pub use transport::{
    FrameSubmitter, InMemoryTransport, InMemoryTransportConfig, MediaTransport, TransportError,
    TransportEvent,
};
pub use types::{
    DataPacketKind, EncodingParams, Participant, RoomInfo, RoomOptions, Sid, Track,
    TrackDirection, TrackKind, TrackPublication, TrackPublishOptions, TrackSource, VideoCodec,
};
