//! Track registry
//!
//! Maps track sids to the track, the adapter serving it and the consumer the
//! adapter feeds. The registry is owned by the session driver and mutated only
//! from its event loop, so it carries no locks.
//!
//! Removal always stops the adapter before the consumer is released. A full
//! teardown walks entries in insertion order grouped as audio sinks, audio
//! sources, video sinks, video sources.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::SessionResult;
use crate::media::consumer::{ConsumerHandle, ConsumerProvider};
use crate::media::sink::{SinkAdapter, SinkStats};
use crate::media::source::{SourceAdapter, SourceStats};
use crate::media::AdapterState;
use crate::transport::{FrameSubmitter, RemoteFrameReceiver};
use crate::types::{Participant, Sid, Track, TrackDirection, TrackKind, TrackPublication};

/// Adapter attached to a registry entry
#[derive(Debug)]
pub enum TrackAdapter {
    Source(SourceAdapter),
    Sink(SinkAdapter),
}

impl TrackAdapter {
    pub fn state(&self) -> AdapterState {
        match self {
            TrackAdapter::Source(source) => source.state(),
            TrackAdapter::Sink(sink) => sink.state(),
        }
    }

    fn stop(&mut self) {
        match self {
            TrackAdapter::Source(source) => source.stop(),
            TrackAdapter::Sink(sink) => sink.stop(),
        }
    }

    fn consumer(&self) -> Option<&ConsumerHandle> {
        match self {
            TrackAdapter::Source(source) => source.preview(),
            TrackAdapter::Sink(sink) => Some(sink.consumer()),
        }
    }
}

#[derive(Debug)]
struct RegistryEntry {
    track: Track,
    participant: Option<Participant>,
    publication: Option<TrackPublication>,
    adapter: TrackAdapter,
    seq: u64,
}

impl RegistryEntry {
    /// Stop the adapter, then release whatever it was feeding
    fn retire(mut self) {
        self.adapter.stop();
        if let Some(consumer) = self.adapter.consumer() {
            consumer.release();
        }
    }

    fn teardown_group(&self) -> u8 {
        match (self.track.kind, &self.adapter) {
            (TrackKind::Audio, TrackAdapter::Sink(_)) => 0,
            (TrackKind::Audio, TrackAdapter::Source(_)) => 1,
            (TrackKind::Video, TrackAdapter::Sink(_)) => 2,
            (TrackKind::Video, TrackAdapter::Source(_)) => 3,
        }
    }
}

/// Registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub active: usize,
    pub subscribed: u64,
    pub unsubscribed: u64,
    pub replaced: u64,
    pub ignored_unsubscribes: u64,
    pub local_published: u64,
    pub local_unpublished: u64,
    pub torn_down: u64,
}

/// Read-only view of one registry entry
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSnapshot {
    pub track: Track,
    /// Server-side metadata; absent for local tracks registered without an ack
    pub publication: Option<TrackPublication>,
    pub participant_identity: Option<String>,
    pub adapter_state: AdapterState,
    pub source_stats: Option<SourceStats>,
    pub sink_stats: Option<SinkStats>,
}

/// Sid → (track, adapter, consumer) map owned by the session driver
pub struct TrackRegistry {
    entries: HashMap<Sid, RegistryEntry>,
    consumers: Arc<dyn ConsumerProvider>,
    next_seq: u64,
    stats: RegistryStats,
}

impl TrackRegistry {
    pub fn new(consumers: Arc<dyn ConsumerProvider>) -> Self {
        Self {
            entries: HashMap::new(),
            consumers,
            next_seq: 0,
            stats: RegistryStats::default(),
        }
    }

    fn insert(&mut self, entry: RegistryEntry) {
        let sid = entry.track.sid.clone();
        if let Some(previous) = self.entries.insert(sid.clone(), entry) {
            // Insert first so the slot is never empty, then retire the old entry
            self.stats.replaced += 1;
            warn!(sid = %sid, "Replacing existing registry entry");
            previous.retire();
        }
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Register a remote track and start feeding its consumer
    pub fn on_track_subscribed(
        &mut self,
        track: Track,
        publication: TrackPublication,
        participant: Participant,
        frames: RemoteFrameReceiver,
    ) -> SessionResult<()> {
        let consumer = match track.kind {
            TrackKind::Video => self.consumers.video_consumer(&track, &participant),
            TrackKind::Audio => self.consumers.audio_consumer(&track, &participant),
        };

        let mut sink = SinkAdapter::new(track.sid.clone(), track.kind, consumer.clone());
        if let Err(e) = sink.start(frames) {
            sink.stop();
            consumer.release();
            return Err(e);
        }

        info!(
            sid = %track.sid,
            kind = %track.kind,
            participant = %participant.identity,
            "Remote track subscribed"
        );
        let seq = self.bump_seq();
        self.insert(RegistryEntry {
            track,
            participant: Some(participant),
            publication: Some(publication),
            adapter: TrackAdapter::Sink(sink),
            seq,
        });
        self.stats.subscribed += 1;
        Ok(())
    }

    /// Drop a remote track. Returns false if the sid was not registered.
    pub fn on_track_unsubscribed(&mut self, sid: &Sid) -> bool {
        let is_remote = self
            .entries
            .get(sid)
            .map(|entry| entry.track.direction == TrackDirection::Remote)
            .unwrap_or(false);
        if !is_remote {
            self.stats.ignored_unsubscribes += 1;
            debug!(sid = %sid, "Unsubscribe for unknown track ignored");
            return false;
        }

        if let Some(entry) = self.entries.remove(sid) {
            entry.retire();
            self.stats.unsubscribed += 1;
            info!(sid = %sid, "Remote track unsubscribed");
        }
        true
    }

    /// Register a published local track and start its source
    pub fn register_local(
        &mut self,
        track: Track,
        publication: Option<TrackPublication>,
        mut source: SourceAdapter,
        submitter: Arc<dyn FrameSubmitter>,
    ) -> SessionResult<()> {
        source.start(submitter)?;
        info!(
            sid = %track.sid,
            kind = %track.kind,
            source = %source.label(),
            "Local track registered"
        );
        let seq = self.bump_seq();
        self.insert(RegistryEntry {
            track,
            participant: None,
            publication,
            adapter: TrackAdapter::Source(source),
            seq,
        });
        self.stats.local_published += 1;
        Ok(())
    }

    /// Stop and remove a local track
    pub fn unregister_local(&mut self, sid: &Sid) -> Option<Track> {
        let is_local = self
            .entries
            .get(sid)
            .map(|entry| entry.track.direction == TrackDirection::Local)
            .unwrap_or(false);
        if !is_local {
            return None;
        }
        let entry = self.entries.remove(sid)?;
        let track = entry.track.clone();
        entry.retire();
        self.stats.local_unpublished += 1;
        info!(sid = %sid, "Local track unregistered");
        Some(track)
    }

    /// Pause or resume every local source
    pub fn set_sources_paused(&mut self, paused: bool) -> usize {
        let mut count = 0;
        for entry in self.entries.values() {
            if let TrackAdapter::Source(source) = &entry.adapter {
                if paused {
                    source.pause();
                } else {
                    source.resume();
                }
                count += 1;
            }
        }
        count
    }

    /// Stop and release everything. Returns the sids in teardown order.
    pub fn teardown_all(&mut self) -> Vec<Sid> {
        if self.entries.is_empty() {
            return Vec::new();
        }

        let mut entries: Vec<RegistryEntry> = self.entries.drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|entry| (entry.teardown_group(), entry.seq));

        let order: Vec<Sid> = entries.iter().map(|e| e.track.sid.clone()).collect();
        for entry in entries {
            debug!(sid = %entry.track.sid, kind = %entry.track.kind, "Tearing down track");
            entry.retire();
        }
        self.stats.torn_down += order.len() as u64;
        info!(tracks = order.len(), "Track registry torn down");
        order
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, sid: &Sid) -> bool {
        self.entries.contains_key(sid)
    }

    /// Registered sids in insertion order
    pub fn sids(&self) -> Vec<Sid> {
        let mut entries: Vec<&RegistryEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|e| e.track.sid.clone()).collect()
    }

    pub fn track(&self, sid: &Sid) -> Option<&Track> {
        self.entries.get(sid).map(|entry| &entry.track)
    }

    pub fn adapter(&self, sid: &Sid) -> Option<&TrackAdapter> {
        self.entries.get(sid).map(|entry| &entry.adapter)
    }

    pub fn snapshot(&self) -> Vec<TrackSnapshot> {
        let mut entries: Vec<&RegistryEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
            .into_iter()
            .map(|entry| {
                let (source_stats, sink_stats) = match &entry.adapter {
                    TrackAdapter::Source(source) => (Some(source.stats()), None),
                    TrackAdapter::Sink(sink) => (None, Some(sink.stats())),
                };
                TrackSnapshot {
                    track: entry.track.clone(),
                    publication: entry.publication.clone(),
                    participant_identity: entry.participant.as_ref().map(|p| p.identity.clone()),
                    adapter_state: entry.adapter.state(),
                    source_stats,
                    sink_stats,
                }
            })
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active: self.entries.len(),
            ..self.stats
        }
    }
}

impl Drop for TrackRegistry {
    fn drop(&mut self) {
        self.teardown_all();
    }
}

impl std::fmt::Debug for TrackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackRegistry")
            .field("sids", &self.sids())
            .field("stats", &self.stats)
            .finish()
    }
}
