//! Boundary to the lower-level media engine
//!
//! The session never talks to the network itself. It drives a
//! [`MediaTransport`], which owns signaling, encoding and decoding. A
//! successful connect yields a [`Connection`] whose event stream delivers
//! track and data events in the order the engine emits them; a successful
//! publish yields a [`FrameSubmitter`] the source adapter pushes frames into.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::media::frame::MediaFrame;
use crate::types::{
    DataPacketKind, Participant, RoomInfo, RoomOptions, Sid, Track, TrackPublication,
    TrackPublishOptions,
};

pub use memory::{InMemoryTransport, InMemoryTransportConfig};

/// Decoded frames pushed by the transport for one remote track
pub type RemoteFrameReceiver = mpsc::Receiver<MediaFrame>;

/// Errors reported by a transport implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rejected by server: {0}")]
    Rejected(String),

    #[error("Transport closed")]
    Closed,
}

impl TransportError {
    /// Map a failure during connect onto the session taxonomy
    pub fn into_connect_error(self) -> SessionError {
        SessionError::connect(self.to_string())
    }

    /// Map a failure during publish onto the session taxonomy
    pub fn into_publish_error(self) -> SessionError {
        SessionError::publish(self.to_string())
    }
}

/// Events emitted by a live connection
#[derive(Debug)]
pub enum TransportEvent {
    /// A remote track became available; decoded frames arrive on `frames`
    TrackSubscribed {
        track: Track,
        publication: TrackPublication,
        participant: Participant,
        frames: RemoteFrameReceiver,
    },
    TrackUnsubscribed {
        track: Track,
        publication: TrackPublication,
        participant: Participant,
    },
    DataReceived {
        payload: Bytes,
        participant: Option<Participant>,
        kind: DataPacketKind,
        topic: Option<String>,
    },
    /// The server or network closed the connection
    Disconnected { reason: String },
}

/// Result of a successful connect
#[derive(Debug)]
pub struct Connection {
    pub room: RoomInfo,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Outbound path for one published local track
pub trait FrameSubmitter: Send + Sync {
    /// Queue a frame for encoding and transmission. Must not block.
    fn submit(&self, frame: MediaFrame) -> Result<(), TransportError>;
}

/// Result of a publish acknowledged by the remote end
pub struct PublishAck {
    pub publication: TrackPublication,
    pub submitter: Arc<dyn FrameSubmitter>,
}

impl std::fmt::Debug for PublishAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishAck")
            .field("publication", &self.publication)
            .finish_non_exhaustive()
    }
}

/// The media engine the session drives
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Join a room. Suspends until the handshake completes.
    async fn connect(
        &self,
        url: &str,
        token: &str,
        options: &RoomOptions,
    ) -> Result<Connection, TransportError>;

    /// Publish a local track. Resolves once the remote end acknowledged it.
    async fn publish_track(
        &self,
        name: &str,
        options: &TrackPublishOptions,
    ) -> Result<PublishAck, TransportError>;

    async fn unpublish_track(&self, sid: &Sid) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
