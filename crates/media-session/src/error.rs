//! Error types for the media-session library
//!
//! Errors fall into two groups that drive how the session reacts:
//!
//! - **Local conditions** - no camera, capture not opened, permission denied,
//!   rejected publish. These are reported to the caller and never tear down an
//!   active session.
//! - **Transport conditions** - connect failures and asynchronous disconnects.
//!   These force a full teardown of the track registry.
//!
//! The core never retries on its own; retry is a caller decision.
//!
//! ```rust,no_run
//! # use roomlink_media_session::{MediaSession, SessionError, RoomOptions};
//! # async fn example(session: &MediaSession) {
//! match session.connect("ws://localhost:7880", "token", RoomOptions::default()).await {
//!     Ok(room) => println!("connected to {}", room.name),
//!     Err(e) if e.is_transport_fatal() => eprintln!("connect failed: {}", e),
//!     Err(e) => eprintln!("{} error: {}", e.category(), e),
//! }
//! # }
//! ```

use thiserror::Error;

use crate::state::SessionState;

/// Result type alias for media-session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the media session and its collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The token service did not hand out a token
    #[error("Token retrieval failed: {reason}")]
    TokenRetrieval { reason: String },

    /// Connecting to the room failed (auth or network)
    #[error("Connect failed: {reason}")]
    Connect { reason: String },

    /// A capture source was used without being opened upstream
    #[error("Capture unavailable: {reason}")]
    CaptureUnavailable { reason: String },

    /// No camera showed up within the bounded device wait
    #[error("No camera device available")]
    NoCameraAvailable,

    /// The user or platform refused access to a device
    #[error("Permission denied: {resource}")]
    PermissionDenied { resource: String },

    /// Publishing a local track failed or was not allowed
    #[error("Publish failed: {reason}")]
    Publish { reason: String },

    /// The transport dropped the connection after it was established
    #[error("Transport disconnected: {reason}")]
    TransportDisconnected { reason: String },

    /// Operation is not valid in the current session state
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: String,
        state: SessionState,
    },

    /// An in-flight operation was abandoned because the session was closed
    #[error("Operation abandoned: {operation}")]
    Abandoned { operation: String },

    /// Configuration value rejected by validation
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Internal failure (dispatcher gone, task panicked)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SessionError {
    /// Create a token retrieval error
    pub fn token_retrieval(reason: impl Into<String>) -> Self {
        Self::TokenRetrieval { reason: reason.into() }
    }

    /// Create a connect error
    pub fn connect(reason: impl Into<String>) -> Self {
        Self::Connect { reason: reason.into() }
    }

    /// Create a capture unavailable error
    pub fn capture_unavailable(reason: impl Into<String>) -> Self {
        Self::CaptureUnavailable { reason: reason.into() }
    }

    /// Create a publish error
    pub fn publish(reason: impl Into<String>) -> Self {
        Self::Publish { reason: reason.into() }
    }

    /// Create an invalid state error
    pub fn invalid_state(operation: impl Into<String>, state: SessionState) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state,
        }
    }

    /// Create an abandoned-operation error
    pub fn abandoned(operation: impl Into<String>) -> Self {
        Self::Abandoned { operation: operation.into() }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Local conditions the caller can fix without reconnecting
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::NoCameraAvailable
                | SessionError::CaptureUnavailable { .. }
                | SessionError::PermissionDenied { .. }
                | SessionError::Publish { .. }
                | SessionError::TokenRetrieval { .. }
        )
    }

    /// Failures that force a full registry teardown
    pub fn is_transport_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Connect { .. } | SessionError::TransportDisconnected { .. }
        )
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            SessionError::TokenRetrieval { .. } => "token",

            SessionError::Connect { .. } | SessionError::TransportDisconnected { .. } => "transport",

            SessionError::CaptureUnavailable { .. }
            | SessionError::NoCameraAvailable
            | SessionError::PermissionDenied { .. } => "device",

            SessionError::Publish { .. } => "publish",

            SessionError::InvalidState { .. } | SessionError::Abandoned { .. } => "state",

            SessionError::InvalidConfiguration { .. } => "configuration",

            SessionError::Internal { .. } => "system",
        }
    }
}
