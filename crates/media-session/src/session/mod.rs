//! Media session handle
//!
//! [`MediaSession`] is a cheap front for the session driver task. Every
//! operation is posted onto the driver's dispatcher queue and answered through
//! a oneshot channel, so callers on any task observe one consistent timeline.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use roomlink_media_session::{
//!     InMemoryTransport, MediaSession, NullConsumerProvider, RoomOptions, SessionConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = MediaSession::new(
//!     SessionConfig::default(),
//!     InMemoryTransport::loopback(),
//!     Arc::new(NullConsumerProvider),
//! );
//! let mut events = session.subscribe_events();
//!
//! let room = session
//!     .connect("ws://localhost:7880", "token", RoomOptions::default())
//!     .await?;
//! println!("joined {}", room.name);
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

mod driver;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::{SessionError, SessionResult};
use crate::events::{EventBus, SessionEvent, SessionEventHandler};
use crate::media::consumer::ConsumerProvider;
use crate::media::source::SourceAdapter;
use crate::registry::{RegistryStats, TrackRegistry, TrackSnapshot};
use crate::state::SessionState;
use crate::token::TokenProvider;
use crate::transport::MediaTransport;
use crate::types::{RoomInfo, RoomOptions, Sid, TrackPublishOptions};

use driver::{Command, DriverInput, SessionDriver};

#[derive(Debug, Default)]
struct Snapshot {
    state: SessionState,
    epoch: u64,
    room: Option<RoomInfo>,
}

/// Values the driver publishes for synchronous reads
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    inner: RwLock<Snapshot>,
}

impl SharedState {
    pub(crate) fn set_state(&self, state: SessionState, epoch: u64) {
        let mut inner = self.inner.write();
        inner.state = state;
        inner.epoch = epoch;
    }

    pub(crate) fn set_room(&self, room: Option<RoomInfo>) {
        self.inner.write().room = room;
    }
}

/// One logical connection to a room
pub struct MediaSession {
    config: SessionConfig,
    dispatcher: EventDispatcher<DriverInput>,
    events: Arc<EventBus>,
    shared: Arc<SharedState>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MediaSession {
    /// Create a session and spawn its driver. Must be called inside a tokio runtime.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn MediaTransport>,
        consumers: Arc<dyn ConsumerProvider>,
    ) -> Self {
        let (dispatcher, queue) = EventDispatcher::channel();
        let events = Arc::new(EventBus::new(config.event_buffer));
        let shared = Arc::new(SharedState::default());

        let driver = SessionDriver::new(
            config.clone(),
            transport,
            TrackRegistry::new(consumers),
            events.clone(),
            shared.clone(),
            dispatcher.clone(),
        );
        let handle = tokio::spawn(driver.run(queue));

        Self {
            config,
            dispatcher,
            events,
            shared,
            driver: Mutex::new(Some(handle)),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.read().state
    }

    /// Current generation; bumped per connect attempt and per teardown
    pub fn epoch(&self) -> u64 {
        self.shared.inner.read().epoch
    }

    pub fn room(&self) -> Option<RoomInfo> {
        self.shared.inner.read().room.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Register a handler. Handlers are called in registration order on the
    /// event delivery task, so they may await session operations.
    pub fn add_handler(&self, handler: Arc<dyn SessionEventHandler>) -> Uuid {
        self.events.add_handler(handler)
    }

    pub fn remove_handler(&self, id: Uuid) -> bool {
        self.events.remove_handler(id)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<SessionResult<T>>) -> Command,
        operation: &str,
    ) -> SessionResult<T> {
        let (tx, rx) = oneshot::channel();
        self.dispatcher.post(DriverInput::Command(make(tx)))?;
        rx.await
            .map_err(|_| SessionError::abandoned(operation.to_string()))?
    }

    /// Join a room. Valid from Disconnected or Failed.
    pub async fn connect(
        &self,
        url: &str,
        token: &str,
        options: RoomOptions,
    ) -> SessionResult<RoomInfo> {
        let url = url.to_string();
        let token = token.to_string();
        self.request(
            |reply| Command::Connect {
                url,
                token,
                options,
                reply,
            },
            "connect",
        )
        .await
    }

    /// Retrieve a token for the configured room and connect with it.
    /// A server url handed out with the token wins over the configured one.
    pub async fn join(&self, tokens: &dyn TokenProvider) -> SessionResult<RoomInfo> {
        let details = tokens.retrieve_token(&self.config.room_name).await?;
        let url = details
            .server_url
            .clone()
            .unwrap_or_else(|| self.config.server_url.clone());
        info!(room = %self.config.room_name, url = %url, "Joining room");
        self.connect(&url, &details.participant_token, self.config.room.clone())
            .await
    }

    pub async fn disconnect(&self) -> SessionResult<()> {
        self.request(
            |reply| Command::Disconnect {
                reason: "client initiated".to_string(),
                reply,
            },
            "disconnect",
        )
        .await
    }

    /// Publish a local track fed by `source`. The source starts pumping only
    /// after the transport acknowledged the publication.
    pub async fn publish_local(
        &self,
        name: &str,
        source: SourceAdapter,
        options: TrackPublishOptions,
    ) -> SessionResult<Sid> {
        let name = name.to_string();
        self.request(
            |reply| Command::Publish {
                name,
                source,
                options,
                reply,
            },
            "publish",
        )
        .await
    }

    pub async fn unpublish_local(&self, sid: &Sid) -> SessionResult<()> {
        let sid = sid.clone();
        self.request(|reply| Command::Unpublish { sid, reply }, "unpublish")
            .await
    }

    /// App pause: pause or resume every local capture source
    pub async fn set_paused(&self, paused: bool) -> SessionResult<usize> {
        self.request(|reply| Command::SetPaused { paused, reply }, "set_paused")
            .await
    }

    pub async fn tracks(&self) -> SessionResult<Vec<TrackSnapshot>> {
        self.request(|reply| Command::Tracks { reply }, "tracks").await
    }

    pub async fn registry_stats(&self) -> SessionResult<RegistryStats> {
        self.request(|reply| Command::Stats { reply }, "stats").await
    }

    /// Disconnect if needed and stop the driver. Waits for pending handler
    /// callbacks unless called from inside one.
    pub async fn shutdown(&self) -> SessionResult<()> {
        let handle = self.driver.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };

        let (tx, rx) = oneshot::channel();
        if self
            .dispatcher
            .post(DriverInput::Command(Command::Shutdown { reply: Some(tx) }))
            .is_ok()
        {
            let _ = rx.await;
        }
        handle
            .await
            .map_err(|e| SessionError::internal(format!("session driver failed: {}", e)))?;
        // Handlers see the final Disconnected before shutdown returns
        self.events.flush().await;
        debug!("Media session shut down");
        Ok(())
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        if self.driver.lock().take().is_some() {
            // Driver tears everything down on its own once it sees this
            let _ = self
                .dispatcher
                .post(DriverInput::Command(Command::Shutdown { reply: None }));
        }
    }
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .field("events", &self.events)
            .finish()
    }
}
