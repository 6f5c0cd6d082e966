//! Session driver: the single event loop that owns the track registry
//!
//! Caller commands, transport events and completions of spawned connect and
//! publish operations all arrive as envelopes on one dispatcher queue. The
//! driver handles one envelope at a time before it looks at the next. Events
//! it emits are published immediately; handler callbacks run on the event
//! bus's delivery task, so a handler awaiting a session operation does not
//! stall the loop that has to answer it.
//!
//! Transport events and completions carry the epoch they were started under.
//! Teardown bumps the epoch, so anything that arrives later for an older epoch
//! is discarded and its resources released.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::dispatcher::{DispatchQueue, EventDispatcher};
use crate::error::{SessionError, SessionResult};
use crate::events::{EventBus, SessionEvent};
use crate::media::source::SourceAdapter;
use crate::registry::{RegistryStats, TrackRegistry, TrackSnapshot};
use crate::session::SharedState;
use crate::state::{SessionState, StateManager};
use crate::transport::{Connection, MediaTransport, PublishAck, TransportError, TransportEvent};
use crate::types::{RoomInfo, RoomOptions, Sid, Track, TrackPublishOptions};

pub(crate) type Reply<T> = oneshot::Sender<SessionResult<T>>;

/// Requests from the session handle
pub(crate) enum Command {
    Connect {
        url: String,
        token: String,
        options: RoomOptions,
        reply: Reply<RoomInfo>,
    },
    Disconnect {
        reason: String,
        reply: Reply<()>,
    },
    Publish {
        name: String,
        source: SourceAdapter,
        options: TrackPublishOptions,
        reply: Reply<Sid>,
    },
    Unpublish {
        sid: Sid,
        reply: Reply<()>,
    },
    SetPaused {
        paused: bool,
        reply: Reply<usize>,
    },
    Tracks {
        reply: Reply<Vec<TrackSnapshot>>,
    },
    Stats {
        reply: Reply<RegistryStats>,
    },
    Shutdown {
        reply: Option<Reply<()>>,
    },
}

/// Everything that can appear on the driver's timeline
pub(crate) enum DriverInput {
    Command(Command),
    Transport {
        epoch: u64,
        event: TransportEvent,
    },
    ConnectCompleted {
        epoch: u64,
        result: Result<Connection, TransportError>,
    },
    PublishCompleted {
        epoch: u64,
        request_id: u64,
        result: Result<PublishAck, TransportError>,
    },
}

impl DriverInput {
    fn label(&self) -> &'static str {
        match self {
            DriverInput::Command(Command::Connect { .. }) => "connect",
            DriverInput::Command(Command::Disconnect { .. }) => "disconnect",
            DriverInput::Command(Command::Publish { .. }) => "publish",
            DriverInput::Command(Command::Unpublish { .. }) => "unpublish",
            DriverInput::Command(Command::SetPaused { .. }) => "set_paused",
            DriverInput::Command(Command::Tracks { .. }) => "tracks",
            DriverInput::Command(Command::Stats { .. }) => "stats",
            DriverInput::Command(Command::Shutdown { .. }) => "shutdown",
            DriverInput::Transport { .. } => "transport_event",
            DriverInput::ConnectCompleted { .. } => "connect_completed",
            DriverInput::PublishCompleted { .. } => "publish_completed",
        }
    }
}

struct PendingConnect {
    epoch: u64,
    reply: Reply<RoomInfo>,
}

struct PendingPublish {
    epoch: u64,
    name: String,
    source: SourceAdapter,
    options: TrackPublishOptions,
    reply: Reply<Sid>,
}

enum Flow {
    Continue,
    Exit,
}

pub(crate) struct SessionDriver {
    config: SessionConfig,
    transport: Arc<dyn MediaTransport>,
    registry: TrackRegistry,
    events: Arc<EventBus>,
    shared: Arc<SharedState>,
    dispatcher: EventDispatcher<DriverInput>,
    state: SessionState,
    epoch: u64,
    room: Option<RoomInfo>,
    pending_connect: Option<PendingConnect>,
    pending_publishes: HashMap<u64, PendingPublish>,
    next_request_id: u64,
    forwarder: Option<JoinHandle<()>>,
}

impl SessionDriver {
    pub(crate) fn new(
        config: SessionConfig,
        transport: Arc<dyn MediaTransport>,
        registry: TrackRegistry,
        events: Arc<EventBus>,
        shared: Arc<SharedState>,
        dispatcher: EventDispatcher<DriverInput>,
    ) -> Self {
        Self {
            config,
            transport,
            registry,
            events,
            shared,
            dispatcher,
            state: SessionState::Disconnected,
            epoch: 0,
            room: None,
            pending_connect: None,
            pending_publishes: HashMap::new(),
            next_request_id: 0,
            forwarder: None,
        }
    }

    /// Drain the queue until shutdown
    pub(crate) async fn run(mut self, mut queue: DispatchQueue<DriverInput>) {
        debug!("Session driver started");
        while let Some(envelope) = queue.next().await {
            trace!(seq = envelope.seq, input = envelope.item.label(), epoch = self.epoch, "Dispatching");
            if let Flow::Exit = self.handle(envelope.item).await {
                break;
            }
        }
        queue.close();

        // Late completions still queued get released by dropping them here
        while let Some(envelope) = queue.next().await {
            self.release_stale(envelope.item);
        }

        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.registry.teardown_all();
        self.abandon_pending("session shut down");
        debug!("Session driver stopped");
    }

    async fn handle(&mut self, input: DriverInput) -> Flow {
        match input {
            DriverInput::Command(command) => return self.handle_command(command).await,
            DriverInput::Transport { epoch, event } => {
                if epoch != self.epoch {
                    trace!(epoch, current = self.epoch, "Dropping stale transport event");
                    return Flow::Continue;
                }
                self.handle_transport_event(event);
            }
            DriverInput::ConnectCompleted { epoch, result } => {
                self.handle_connect_completed(epoch, result).await;
            }
            DriverInput::PublishCompleted {
                epoch,
                request_id,
                result,
            } => {
                self.handle_publish_completed(epoch, request_id, result).await;
            }
        }
        Flow::Continue
    }

    async fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Connect {
                url,
                token,
                options,
                reply,
            } => self.start_connect(url, token, options, reply),
            Command::Disconnect { reason, reply } => {
                let result = self.disconnect(&reason).await;
                let _ = reply.send(result);
            }
            Command::Publish {
                name,
                source,
                options,
                reply,
            } => self.start_publish(name, source, options, reply),
            Command::Unpublish { sid, reply } => {
                let result = self.unpublish(&sid).await;
                let _ = reply.send(result);
            }
            Command::SetPaused { paused, reply } => {
                let count = self.registry.set_sources_paused(paused);
                info!(paused, sources = count, "Local capture paused state changed");
                let text = if paused { "Capture paused" } else { "Capture resumed" };
                self.events.emit(SessionEvent::status(text));
                let _ = reply.send(Ok(count));
            }
            Command::Tracks { reply } => {
                let _ = reply.send(Ok(self.registry.snapshot()));
            }
            Command::Stats { reply } => {
                let _ = reply.send(Ok(self.registry.stats()));
            }
            Command::Shutdown { reply } => {
                if self.state.can_disconnect() {
                    if let Err(e) = self.disconnect("session shut down").await {
                        warn!(error = %e, "Disconnect during shutdown failed");
                    }
                }
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    fn transition(&mut self, new_state: SessionState) -> SessionResult<()> {
        let old_state = self.state;
        if let Err(e) = StateManager::validate_transition(old_state, new_state) {
            error!(from = %old_state, to = %new_state, "Rejected state transition");
            return Err(e);
        }
        self.state = new_state;
        self.shared.set_state(new_state, self.epoch);
        info!(from = %old_state, to = %new_state, epoch = self.epoch, "Session state changed");
        self.events.emit(SessionEvent::StateChanged {
            old_state,
            new_state,
            epoch: self.epoch,
        });
        Ok(())
    }

    fn bump_epoch(&mut self) {
        self.epoch += 1;
        self.shared.set_state(self.state, self.epoch);
    }

    fn report(&self, error: SessionError) {
        self.events.emit(SessionEvent::status(format!("Error: {}", error)));
        self.events.emit(SessionEvent::Error { error });
    }

    fn start_connect(
        &mut self,
        url: String,
        token: String,
        options: RoomOptions,
        reply: Reply<RoomInfo>,
    ) {
        if !self.state.can_connect() {
            let _ = reply.send(Err(SessionError::invalid_state("connect", self.state)));
            return;
        }

        self.bump_epoch();
        if let Err(e) = self.transition(SessionState::Connecting) {
            let _ = reply.send(Err(e));
            return;
        }

        if token.trim().is_empty() {
            let error = SessionError::connect(TransportError::Auth("empty token".into()).to_string());
            warn!(url = %url, "Connect rejected: empty token");
            let _ = self.transition(SessionState::Failed);
            self.report(error.clone());
            let _ = reply.send(Err(error));
            return;
        }

        info!(url = %url, epoch = self.epoch, "Connecting to room");
        self.events.emit(SessionEvent::status(format!("Connecting to {}", url)));

        self.pending_connect = Some(PendingConnect {
            epoch: self.epoch,
            reply,
        });

        let epoch = self.epoch;
        let transport = self.transport.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let result = transport.connect(&url, &token, &options).await;
            if dispatcher
                .post(DriverInput::ConnectCompleted { epoch, result })
                .is_err()
            {
                debug!(epoch, "Connect completed after session shut down");
            }
        });
    }

    async fn handle_connect_completed(
        &mut self,
        epoch: u64,
        result: Result<Connection, TransportError>,
    ) {
        let current = epoch == self.epoch && self.state == SessionState::Connecting;
        let pending = match self.pending_connect.take() {
            Some(p) if current && p.epoch == epoch => p,
            other => {
                self.pending_connect = other;
                debug!(epoch, current = self.epoch, "Discarding stale connect completion");
                if result.is_ok() && !self.state.is_connected() && self.state != SessionState::Connecting {
                    // Nothing newer is using the transport; hang up the late connection
                    if let Err(e) = self.transport.disconnect().await {
                        warn!(error = %e, "Failed to drop late connection");
                    }
                }
                return;
            }
        };

        match result {
            Ok(connection) => {
                let room = connection.room.clone();
                self.room = Some(room.clone());
                self.shared.set_room(Some(room.clone()));
                let _ = self.transition(SessionState::Connected);
                self.events.emit(SessionEvent::Connected {
                    room_name: room.name.clone(),
                });
                self.events.emit(SessionEvent::status(format!("Connected to room {}", room.name)));
                let _ = pending.reply.send(Ok(room));

                // Only start forwarding once Connected has been emitted
                self.forwarder = Some(self.spawn_forwarder(connection));
            }
            Err(e) => {
                let error = e.into_connect_error();
                warn!(epoch, error = %error, "Connect failed");
                let _ = self.transition(SessionState::Failed);
                self.report(error.clone());
                let _ = pending.reply.send(Err(error));
            }
        }
    }

    fn spawn_forwarder(&self, connection: Connection) -> JoinHandle<()> {
        let epoch = self.epoch;
        let dispatcher = self.dispatcher.clone();
        let mut events = connection.events;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let is_disconnect = matches!(event, TransportEvent::Disconnected { .. });
                if dispatcher.post(DriverInput::Transport { epoch, event }).is_err() || is_disconnect {
                    return;
                }
            }
            let _ = dispatcher.post(DriverInput::Transport {
                epoch,
                event: TransportEvent::Disconnected {
                    reason: "transport event stream closed".to_string(),
                },
            });
        })
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::TrackSubscribed {
                track,
                publication,
                participant,
                frames,
            } => {
                if !self.state.is_connected() {
                    debug!(sid = %track.sid, state = %self.state, "Ignoring subscribe outside Connected");
                    return;
                }
                let sid = track.sid.clone();
                let kind = track.kind;
                let identity = participant.identity.clone();
                match self
                    .registry
                    .on_track_subscribed(track, publication, participant, frames)
                {
                    Ok(()) => {
                        self.events.emit(SessionEvent::TrackSubscribed {
                            sid,
                            kind,
                            participant_identity: identity,
                        });
                    }
                    Err(e) => {
                        warn!(sid = %sid, error = %e, "Failed to attach remote track");
                        self.report(e);
                    }
                }
            }
            TransportEvent::TrackUnsubscribed { track, .. } => {
                if self.registry.on_track_unsubscribed(&track.sid) {
                    self.events.emit(SessionEvent::TrackUnsubscribed { sid: track.sid });
                }
            }
            TransportEvent::DataReceived {
                payload,
                participant,
                kind,
                topic,
            } => {
                let identity = participant.map(|p| p.identity);
                let text = format!(
                    "DataReceived: from {}, data {}",
                    identity.as_deref().unwrap_or("server"),
                    String::from_utf8_lossy(&payload)
                );
                debug!(from = ?identity, topic = ?topic, bytes = payload.len(), "Data packet received");
                self.events.emit(SessionEvent::DataReceived {
                    participant_identity: identity,
                    topic,
                    kind,
                    payload,
                });
                self.events.emit(SessionEvent::status(text));
            }
            TransportEvent::Disconnected { reason } => {
                if !self.state.is_connected() {
                    return;
                }
                warn!(reason = %reason, epoch = self.epoch, "Transport disconnected");
                self.fail_connected(reason);
            }
        }
    }

    /// Connected → Failed after the transport dropped us
    fn fail_connected(&mut self, reason: String) {
        self.bump_epoch();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.registry.teardown_all();
        self.abandon_pending("transport disconnected");
        self.room = None;
        self.shared.set_room(None);
        let _ = self.transition(SessionState::Failed);
        self.report(SessionError::TransportDisconnected {
            reason: reason.clone(),
        });
        self.events.emit(SessionEvent::Disconnected { reason });
    }

    async fn disconnect(&mut self, reason: &str) -> SessionResult<()> {
        if !self.state.can_disconnect() {
            return Err(SessionError::invalid_state("disconnect", self.state));
        }
        let was = self.state;

        self.transition(SessionState::Closing)?;
        self.bump_epoch();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        let torn_down = self.registry.teardown_all();
        self.abandon_pending("session disconnected");

        if was != SessionState::Failed {
            let timeout = self.config.disconnect_timeout();
            match tokio::time::timeout(timeout, self.transport.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Transport disconnect reported an error"),
                Err(_) => warn!(timeout_ms = timeout.as_millis() as u64, "Transport disconnect timed out"),
            }
        }

        self.room = None;
        self.shared.set_room(None);
        self.transition(SessionState::Disconnected)?;
        info!(reason, tracks = torn_down.len(), "Session disconnected");
        self.events.emit(SessionEvent::Disconnected {
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Answer everyone still waiting on an operation of an older epoch
    fn abandon_pending(&mut self, why: &str) {
        if let Some(pending) = self.pending_connect.take() {
            debug!(epoch = pending.epoch, why, "Abandoning in-flight connect");
            let _ = pending.reply.send(Err(SessionError::abandoned("connect")));
        }
        for (request_id, mut pending) in self.pending_publishes.drain() {
            debug!(request_id, name = %pending.name, why, "Abandoning in-flight publish");
            pending.source.stop();
            let _ = pending.reply.send(Err(SessionError::abandoned("publish")));
        }
    }

    fn start_publish(
        &mut self,
        name: String,
        mut source: SourceAdapter,
        options: TrackPublishOptions,
        reply: Reply<Sid>,
    ) {
        let rejected = if !self.state.is_connected() {
            Some(SessionError::publish(format!(
                "cannot publish {} while session is {}",
                name, self.state
            )))
        } else if options.kind() != source.kind() {
            Some(SessionError::publish(format!(
                "{} encoding does not match {} source",
                options.kind(),
                source.kind()
            )))
        } else if !source.is_capture_open() {
            Some(SessionError::capture_unavailable(format!(
                "capture for {} was never opened",
                name
            )))
        } else {
            source.validate().err()
        };
        if let Some(error) = rejected {
            source.stop();
            warn!(name = %name, error = %error, "Publish rejected");
            let _ = reply.send(Err(error));
            return;
        }

        self.next_request_id += 1;
        let request_id = self.next_request_id;
        let epoch = self.epoch;
        debug!(request_id, name = %name, kind = %options.kind(), "Publishing local track");

        let transport = self.transport.clone();
        let dispatcher = self.dispatcher.clone();
        let publish_name = name.clone();
        let publish_options = options.clone();
        tokio::spawn(async move {
            let result = transport.publish_track(&publish_name, &publish_options).await;
            if dispatcher
                .post(DriverInput::PublishCompleted {
                    epoch,
                    request_id,
                    result,
                })
                .is_err()
            {
                debug!(request_id, "Publish completed after session shut down");
            }
        });

        self.pending_publishes.insert(
            request_id,
            PendingPublish {
                epoch,
                name,
                source,
                options,
                reply,
            },
        );
    }

    async fn handle_publish_completed(
        &mut self,
        epoch: u64,
        request_id: u64,
        result: Result<PublishAck, TransportError>,
    ) {
        let pending = match self.pending_publishes.remove(&request_id) {
            Some(p) if p.epoch == epoch && epoch == self.epoch && self.state.is_connected() => p,
            other => {
                debug!(request_id, epoch, current = self.epoch, "Discarding stale publish completion");
                if let Some(mut pending) = other {
                    pending.source.stop();
                    let _ = pending.reply.send(Err(SessionError::abandoned("publish")));
                }
                if let Ok(ack) = result {
                    self.withdraw(&ack.publication.sid).await;
                }
                return;
            }
        };

        let PendingPublish {
            name,
            source,
            options,
            reply,
            ..
        } = pending;

        match result {
            Ok(ack) => {
                let sid = ack.publication.sid.clone();
                let kind = ack.publication.kind;
                let track = Track::local(sid.clone(), name, options.encoding);
                match self
                    .registry
                    .register_local(track, Some(ack.publication), source, ack.submitter)
                {
                    Ok(()) => {
                        self.events.emit(SessionEvent::LocalTrackPublished {
                            sid: sid.clone(),
                            kind,
                        });
                        let _ = reply.send(Ok(sid));
                    }
                    Err(e) => {
                        warn!(sid = %sid, error = %e, "Published track could not start its source");
                        self.withdraw(&sid).await;
                        self.report(e.clone());
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Err(e) => {
                let mut source = source;
                source.stop();
                let error = e.into_publish_error();
                warn!(name = %name, error = %error, "Publish failed");
                self.report(error.clone());
                let _ = reply.send(Err(error));
            }
        }
    }

    /// Tell the transport to drop a publication nobody will feed
    async fn withdraw(&mut self, sid: &Sid) {
        if let Err(e) = self.transport.unpublish_track(sid).await {
            debug!(sid = %sid, error = %e, "Unpublish of abandoned track failed");
        }
    }

    async fn unpublish(&mut self, sid: &Sid) -> SessionResult<()> {
        if self.registry.unregister_local(sid).is_none() {
            return Err(SessionError::publish(format!("{} is not a published local track", sid)));
        }
        if let Err(e) = self.transport.unpublish_track(sid).await {
            warn!(sid = %sid, error = %e, "Transport unpublish failed");
        }
        self.events.emit(SessionEvent::LocalTrackUnpublished { sid: sid.clone() });
        Ok(())
    }

    /// Release resources held by an input that will never be handled
    fn release_stale(&mut self, input: DriverInput) {
        match input {
            DriverInput::Command(Command::Publish {
                mut source, reply, ..
            }) => {
                source.stop();
                let _ = reply.send(Err(SessionError::abandoned("publish")));
            }
            DriverInput::Command(Command::Connect { reply, .. }) => {
                let _ = reply.send(Err(SessionError::abandoned("connect")));
            }
            DriverInput::PublishCompleted { request_id, .. } => {
                if let Some(mut pending) = self.pending_publishes.remove(&request_id) {
                    pending.source.stop();
                    let _ = pending.reply.send(Err(SessionError::abandoned("publish")));
                }
            }
            // Dropping the rest drops their reply senders and frame receivers
            _ => {}
        }
    }
}
