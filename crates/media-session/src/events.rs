//! Session events and their delivery
//!
//! The session driver emits [`SessionEvent`]s from its event loop. Each event
//! goes to every `tokio::sync::broadcast` subscriber right away and is queued
//! for the handler delivery task, which calls each registered
//! [`SessionEventHandler`] in registration order, one awaited after the other.
//! Handlers never run concurrently with each other, and events reach them in
//! emission order. The driver does not wait for them, so a handler may await
//! session operations.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::SessionError;
use crate::state::SessionState;
use crate::types::{DataPacketKind, Sid, TrackKind};

/// Event priority levels for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// Everything observable about a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Exactly one per state transition
    StateChanged {
        old_state: SessionState,
        new_state: SessionState,
        epoch: u64,
    },

    Connected {
        room_name: String,
    },

    Disconnected {
        reason: String,
    },

    TrackSubscribed {
        sid: Sid,
        kind: TrackKind,
        participant_identity: String,
    },

    TrackUnsubscribed {
        sid: Sid,
    },

    LocalTrackPublished {
        sid: Sid,
        kind: TrackKind,
    },

    LocalTrackUnpublished {
        sid: Sid,
    },

    DataReceived {
        participant_identity: Option<String>,
        topic: Option<String>,
        kind: DataPacketKind,
        payload: Bytes,
    },

    /// Human readable status line for the UI
    Status {
        text: String,
        timestamp: DateTime<Utc>,
    },

    Error {
        error: SessionError,
    },
}

impl SessionEvent {
    pub fn status(text: impl Into<String>) -> Self {
        SessionEvent::Status {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn priority(&self) -> EventPriority {
        match self {
            SessionEvent::Error { error } if error.is_transport_fatal() => EventPriority::Critical,
            SessionEvent::Error { .. } | SessionEvent::Disconnected { .. } => EventPriority::High,
            SessionEvent::Status { .. } | SessionEvent::DataReceived { .. } => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::StateChanged { .. } => "state_changed",
            SessionEvent::Connected { .. } => "connected",
            SessionEvent::Disconnected { .. } => "disconnected",
            SessionEvent::TrackSubscribed { .. } => "track_subscribed",
            SessionEvent::TrackUnsubscribed { .. } => "track_unsubscribed",
            SessionEvent::LocalTrackPublished { .. } => "local_track_published",
            SessionEvent::LocalTrackUnpublished { .. } => "local_track_unpublished",
            SessionEvent::DataReceived { .. } => "data_received",
            SessionEvent::Status { .. } => "status",
            SessionEvent::Error { .. } => "error",
        }
    }
}

/// Callback interface for session events
///
/// Every method has an empty default, so implementors only override what they
/// care about. [`on_session_event`](Self::on_session_event) fans an event out
/// to the specific methods.
#[async_trait]
pub trait SessionEventHandler: Send + Sync {
    async fn on_state_changed(&self, _old: SessionState, _new: SessionState) {}

    async fn on_connected(&self, _room_name: &str) {}

    async fn on_disconnected(&self, _reason: &str) {}

    async fn on_track_subscribed(&self, _sid: &Sid, _kind: TrackKind, _participant: &str) {}

    async fn on_track_unsubscribed(&self, _sid: &Sid) {}

    async fn on_local_track_published(&self, _sid: &Sid, _kind: TrackKind) {}

    async fn on_data_received(&self, _participant: Option<&str>, _payload: &Bytes) {}

    async fn on_status(&self, _text: &str) {}

    async fn on_error(&self, _error: &SessionError) {}

    async fn on_session_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged {
                old_state,
                new_state,
                ..
            } => self.on_state_changed(*old_state, *new_state).await,
            SessionEvent::Connected { room_name } => self.on_connected(room_name).await,
            SessionEvent::Disconnected { reason } => self.on_disconnected(reason).await,
            SessionEvent::TrackSubscribed {
                sid,
                kind,
                participant_identity,
            } => {
                self.on_track_subscribed(sid, *kind, participant_identity)
                    .await
            }
            SessionEvent::TrackUnsubscribed { sid } => self.on_track_unsubscribed(sid).await,
            SessionEvent::LocalTrackPublished { sid, kind } => {
                self.on_local_track_published(sid, *kind).await
            }
            SessionEvent::LocalTrackUnpublished { .. } => {}
            SessionEvent::DataReceived {
                participant_identity,
                payload,
                ..
            } => {
                self.on_data_received(participant_identity.as_deref(), payload)
                    .await
            }
            SessionEvent::Status { text, .. } => self.on_status(text).await,
            SessionEvent::Error { error } => self.on_error(error).await,
        }
    }
}

enum Delivery {
    Event(SessionEvent, Vec<Arc<dyn SessionEventHandler>>),
    Flush(oneshot::Sender<()>),
}

tokio::task_local! {
    static IN_DELIVERY: ();
}

/// Fan-out point for session events
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
    handlers: RwLock<Vec<(Uuid, Arc<dyn SessionEventHandler>)>>,
    delivery: mpsc::UnboundedSender<Delivery>,
}

impl EventBus {
    /// Create a bus and spawn its handler delivery task. Must be called inside
    /// a tokio runtime.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let (delivery, queue) = mpsc::unbounded_channel();
        tokio::spawn(deliver(queue));
        Self {
            sender,
            handlers: RwLock::new(Vec::new()),
            delivery,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn add_handler(&self, handler: Arc<dyn SessionEventHandler>) -> Uuid {
        let id = Uuid::new_v4();
        self.handlers.write().push((id, handler));
        id
    }

    pub fn remove_handler(&self, id: Uuid) -> bool {
        let mut handlers = self.handlers.write();
        match handlers.iter().position(|(hid, _)| *hid == id) {
            Some(pos) => {
                handlers.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Publish to subscribers and queue the event for the handlers registered
    /// right now
    pub fn emit(&self, event: SessionEvent) {
        trace!(event = event.name(), priority = ?event.priority(), "Emitting session event");

        // No receivers is not an error
        let _ = self.sender.send(event.clone());

        let handlers: Vec<Arc<dyn SessionEventHandler>> =
            self.handlers.read().iter().map(|(_, h)| h.clone()).collect();
        if handlers.is_empty() {
            return;
        }
        if self.delivery.send(Delivery::Event(event, handlers)).is_err() {
            debug!("Handler delivery task is gone, event dropped");
        }
    }

    /// Wait until the handlers are done with every event emitted so far.
    /// Returns immediately when called from inside a handler.
    pub async fn flush(&self) {
        if IN_DELIVERY.try_with(|_| ()).is_ok() {
            return;
        }
        let (done, wait) = oneshot::channel();
        if self.delivery.send(Delivery::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

async fn deliver(mut queue: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(item) = queue.recv().await {
        match item {
            Delivery::Event(event, handlers) => {
                for handler in handlers {
                    IN_DELIVERY
                        .scope((), handler.on_session_event(&event))
                        .await;
                }
            }
            Delivery::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .field("handlers", &self.handler_count())
            .finish()
    }
}
