//! Session state and transition validation

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

/// Lifecycle state of a media session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SessionState {
    /// No connection; the only state `connect` starts from
    #[default]
    Disconnected,
    /// Transport handshake in flight
    Connecting,
    /// Room joined, tracks may be published and subscribed
    Connected,
    /// Connect failed or the transport dropped; registry already torn down
    Failed,
    /// Disconnect in progress
    Closing,
}

impl SessionState {
    /// Whether `connect` may be called from this state
    pub fn can_connect(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed)
    }

    /// Whether `disconnect` may be called from this state
    pub fn can_disconnect(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Connecting | SessionState::Failed
        )
    }

    /// Whether tracks may be published or subscribed
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Failed => write!(f, "failed"),
            SessionState::Closing => write!(f, "closing"),
        }
    }
}

/// State transition validator
pub struct StateManager;

impl StateManager {
    pub fn can_transition(from: SessionState, to: SessionState) -> bool {
        use SessionState::*;

        match (from, to) {
            (Disconnected, Connecting) => true,
            (Failed, Connecting) => true,
            (Connecting, Connected) => true,
            (Connecting, Failed) => true,
            (Connecting, Closing) => true,
            (Connected, Closing) => true,
            (Connected, Failed) => true,
            (Failed, Closing) => true,
            (Closing, Disconnected) => true,
            _ => false,
        }
    }

    pub fn validate_transition(from: SessionState, to: SessionState) -> SessionResult<()> {
        if Self::can_transition(from, to) {
            Ok(())
        } else {
            Err(SessionError::internal(format!(
                "Invalid state transition: {} -> {}",
                from, to
            )))
        }
    }
}
