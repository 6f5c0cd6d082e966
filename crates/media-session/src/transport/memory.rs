//! In-process transport
//!
//! `InMemoryTransport` stands in for a real media engine. Tests script it
//! (inject remote tracks, data packets, disconnects, failures, delays) and the
//! sample application runs it in loopback mode, where every published local
//! track comes straight back as a remote track from an `echo` participant.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    Connection, FrameSubmitter, MediaTransport, PublishAck, TransportError, TransportEvent,
};
use crate::media::frame::MediaFrame;
use crate::types::{
    DataPacketKind, EncodingParams, Participant, RoomInfo, RoomOptions, Sid, Track, TrackKind,
    TrackPublication, TrackPublishOptions,
};

/// Behaviour knobs for [`InMemoryTransport`]
#[derive(Debug, Clone)]
pub struct InMemoryTransportConfig {
    /// Room name reported on connect
    pub room_name: String,
    /// Identity of the local participant
    pub identity: String,
    /// Artificial connect handshake latency
    pub connect_delay: Duration,
    /// Artificial publish acknowledgment latency
    pub publish_delay: Duration,
    /// Publishes above this bitrate are rejected
    pub max_bitrate: u64,
    /// Echo every published track back as a remote track
    pub loopback: bool,
    /// Capacity of each remote track's frame channel
    pub frame_queue: usize,
}

impl Default for InMemoryTransportConfig {
    fn default() -> Self {
        Self {
            room_name: "testRoom".to_string(),
            identity: "local".to_string(),
            connect_delay: Duration::ZERO,
            publish_delay: Duration::ZERO,
            max_bitrate: 10_000_000,
            loopback: false,
            frame_queue: 64,
        }
    }
}

#[derive(Debug, Default)]
struct PublishedStats {
    frames: AtomicU64,
}

struct PublishedTrack {
    publication: TrackPublication,
    stats: Arc<PublishedStats>,
    closed: Arc<AtomicBool>,
}

struct RemoteTrack {
    track: Track,
    publication: TrackPublication,
    participant: Participant,
}

#[derive(Default)]
struct Inner {
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    published: HashMap<Sid, PublishedTrack>,
    remote: HashMap<Sid, RemoteTrack>,
    connect_failure: Option<TransportError>,
    publish_failure: Option<TransportError>,
    connect_calls: usize,
    disconnect_calls: usize,
}

struct MemorySubmitter {
    sid: Sid,
    stats: Arc<PublishedStats>,
    closed: Arc<AtomicBool>,
    echo: Option<mpsc::Sender<MediaFrame>>,
}

impl FrameSubmitter for MemorySubmitter {
    fn submit(&self, frame: MediaFrame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        if let Some(echo) = &self.echo {
            // Dropped echo frames are fine, the remote side is lossy anyway
            if echo.try_send(frame).is_err() {
                debug!(sid = %self.sid, "Loopback queue full, dropping echoed frame");
            }
        }
        Ok(())
    }
}

/// Scriptable in-process [`MediaTransport`]
pub struct InMemoryTransport {
    config: InMemoryTransportConfig,
    inner: Mutex<Inner>,
}

impl InMemoryTransport {
    pub fn new(config: InMemoryTransportConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Transport with default behaviour
    pub fn default_arc() -> Arc<Self> {
        Self::new(InMemoryTransportConfig::default())
    }

    /// Transport that echoes published tracks back
    pub fn loopback() -> Arc<Self> {
        Self::new(InMemoryTransportConfig {
            loopback: true,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &InMemoryTransportConfig {
        &self.config
    }

    /// Make the next connect attempts fail with `error`
    pub fn fail_connect_with(&self, error: Option<TransportError>) {
        self.inner.lock().connect_failure = error;
    }

    /// Make the next publishes fail with `error`
    pub fn fail_publish_with(&self, error: Option<TransportError>) {
        self.inner.lock().publish_failure = error;
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().events.is_some()
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.lock().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.inner.lock().disconnect_calls
    }

    pub fn published_sids(&self) -> Vec<Sid> {
        let mut sids: Vec<Sid> = self.inner.lock().published.keys().cloned().collect();
        sids.sort();
        sids
    }

    /// Frames submitted so far on a published track
    pub fn submitted_frames(&self, sid: &Sid) -> u64 {
        self.inner
            .lock()
            .published
            .get(sid)
            .map(|track| track.stats.frames.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Announce a remote track; returns the sender used to push decoded frames
    pub fn inject_track_subscribed(
        &self,
        track: Track,
        participant: Participant,
    ) -> Result<mpsc::Sender<MediaFrame>, TransportError> {
        let (frame_tx, frame_rx) = mpsc::channel(self.config.frame_queue);
        let publication = remote_publication(&track);
        let mut inner = self.inner.lock();
        let events = inner.events.clone().ok_or(TransportError::Closed)?;
        inner.remote.insert(
            track.sid.clone(),
            RemoteTrack {
                track: track.clone(),
                publication: publication.clone(),
                participant: participant.clone(),
            },
        );
        events
            .send(TransportEvent::TrackSubscribed {
                track,
                publication,
                participant,
                frames: frame_rx,
            })
            .map_err(|_| TransportError::Closed)?;
        Ok(frame_tx)
    }

    /// Withdraw a remote track previously announced
    pub fn inject_track_unsubscribed(&self, sid: &Sid) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        let events = inner.events.clone().ok_or(TransportError::Closed)?;
        let remote = inner
            .remote
            .remove(sid)
            .ok_or_else(|| TransportError::Rejected(format!("unknown remote track {}", sid)))?;
        events
            .send(TransportEvent::TrackUnsubscribed {
                track: remote.track,
                publication: remote.publication,
                participant: remote.participant,
            })
            .map_err(|_| TransportError::Closed)
    }

    /// Push an arbitrary event onto the live connection's stream
    pub fn inject_raw_event(&self, event: TransportEvent) -> Result<(), TransportError> {
        let inner = self.inner.lock();
        let events = inner.events.as_ref().ok_or(TransportError::Closed)?;
        events.send(event).map_err(|_| TransportError::Closed)
    }

    pub fn inject_data(
        &self,
        payload: impl Into<Bytes>,
        from: Option<Participant>,
        topic: Option<&str>,
    ) -> Result<(), TransportError> {
        self.inject_raw_event(TransportEvent::DataReceived {
            payload: payload.into(),
            participant: from,
            kind: DataPacketKind::Reliable,
            topic: topic.map(str::to_string),
        })
    }

    /// Simulate the server dropping the connection
    pub fn inject_disconnect(&self, reason: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        let events = inner.events.take().ok_or(TransportError::Closed)?;
        close_published(&mut inner);
        events
            .send(TransportEvent::Disconnected {
                reason: reason.to_string(),
            })
            .map_err(|_| TransportError::Closed)
    }

    fn check_encoding(&self, options: &TrackPublishOptions) -> Result<(), TransportError> {
        let bitrate = options.encoding.max_bitrate();
        if bitrate == 0 {
            return Err(TransportError::Rejected("max bitrate must be positive".into()));
        }
        if bitrate > self.config.max_bitrate {
            return Err(TransportError::Rejected(format!(
                "max bitrate {} exceeds server limit {}",
                bitrate, self.config.max_bitrate
            )));
        }
        if let EncodingParams::Video { max_framerate, .. } = &options.encoding {
            if !(*max_framerate > 0.0) {
                return Err(TransportError::Rejected("max framerate must be positive".into()));
            }
        }
        Ok(())
    }
}

fn remote_publication(track: &Track) -> TrackPublication {
    TrackPublication {
        sid: track.sid.clone(),
        name: track.name.clone(),
        kind: track.kind,
        source: Default::default(),
        mime_type: match track.kind {
            TrackKind::Audio => "audio/opus".to_string(),
            TrackKind::Video => "video/VP8".to_string(),
        },
        simulcasted: false,
        muted: false,
    }
}

fn close_published(inner: &mut Inner) {
    for (_, track) in inner.published.drain() {
        track.closed.store(true, Ordering::Release);
    }
    inner.remote.clear();
}

#[async_trait]
impl MediaTransport for InMemoryTransport {
    async fn connect(
        &self,
        url: &str,
        token: &str,
        options: &RoomOptions,
    ) -> Result<Connection, TransportError> {
        {
            let mut inner = self.inner.lock();
            inner.connect_calls += 1;
        }

        if !self.config.connect_delay.is_zero() {
            tokio::time::sleep(self.config.connect_delay).await;
        }

        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(TransportError::Network(format!("unsupported url scheme: {}", url)));
        }
        if token.trim().is_empty() {
            return Err(TransportError::Auth("empty token".into()));
        }

        let mut inner = self.inner.lock();
        if let Some(error) = inner.connect_failure.clone() {
            return Err(error);
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        inner.events = Some(event_tx);
        info!(
            url,
            room = %self.config.room_name,
            auto_subscribe = options.auto_subscribe,
            "In-memory transport connected"
        );

        Ok(Connection {
            room: RoomInfo {
                sid: Sid::generate("RM_"),
                name: self.config.room_name.clone(),
                local_participant: Participant::new(self.config.identity.clone()),
            },
            events: event_rx,
        })
    }

    async fn publish_track(
        &self,
        name: &str,
        options: &TrackPublishOptions,
    ) -> Result<PublishAck, TransportError> {
        if !self.config.publish_delay.is_zero() {
            tokio::time::sleep(self.config.publish_delay).await;
        }

        self.check_encoding(options)?;

        let sid = Sid::generate("TR_");
        let (mime_type, simulcasted) = match &options.encoding {
            EncodingParams::Audio { .. } => ("audio/opus".to_string(), false),
            EncodingParams::Video { codec, simulcast, .. } => {
                (codec.mime_type().to_string(), *simulcast)
            }
        };
        let publication = TrackPublication {
            sid: sid.clone(),
            name: name.to_string(),
            kind: options.kind(),
            source: options.source,
            mime_type,
            simulcasted,
            muted: false,
        };

        let mut inner = self.inner.lock();
        if let Some(error) = inner.publish_failure.clone() {
            return Err(error);
        }
        let events = inner.events.clone().ok_or(TransportError::Closed)?;

        let stats = Arc::new(PublishedStats::default());
        let closed = Arc::new(AtomicBool::new(false));

        let echo = if self.config.loopback {
            let (frame_tx, frame_rx) = mpsc::channel(self.config.frame_queue);
            let echo_sid = Sid::new(format!("{}_echo", sid));
            let track = Track::remote(echo_sid.clone(), format!("echo-{}", name), options.kind());
            let participant = Participant::new("echo");
            let echo_publication = remote_publication(&track);
            inner.remote.insert(
                echo_sid,
                RemoteTrack {
                    track: track.clone(),
                    publication: echo_publication.clone(),
                    participant: participant.clone(),
                },
            );
            if events
                .send(TransportEvent::TrackSubscribed {
                    track,
                    publication: echo_publication,
                    participant,
                    frames: frame_rx,
                })
                .is_err()
            {
                warn!(sid = %sid, "Loopback subscriber is gone");
            }
            Some(frame_tx)
        } else {
            None
        };

        inner.published.insert(
            sid.clone(),
            PublishedTrack {
                publication: publication.clone(),
                stats: stats.clone(),
                closed: closed.clone(),
            },
        );
        debug!(sid = %sid, name, kind = %publication.kind, "Track published");

        Ok(PublishAck {
            publication,
            submitter: Arc::new(MemorySubmitter {
                sid,
                stats,
                closed,
                echo,
            }),
        })
    }

    async fn unpublish_track(&self, sid: &Sid) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        let track = inner
            .published
            .remove(sid)
            .ok_or_else(|| TransportError::Rejected(format!("track {} is not published", sid)))?;
        track.closed.store(true, Ordering::Release);
        debug!(sid = %sid, name = %track.publication.name, "Track unpublished");

        let echo_sid = Sid::new(format!("{}_echo", sid));
        if let Some(remote) = inner.remote.remove(&echo_sid) {
            if let Some(events) = &inner.events {
                let _ = events.send(TransportEvent::TrackUnsubscribed {
                    track: remote.track,
                    publication: remote.publication,
                    participant: remote.participant,
                });
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.disconnect_calls += 1;
        inner.events = None;
        close_published(&mut inner);
        info!(room = %self.config.room_name, "In-memory transport disconnected");
        Ok(())
    }
}
