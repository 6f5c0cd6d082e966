//! Single-timeline event dispatcher
//!
//! Everything that mutates session state is posted as an envelope onto one
//! unbounded FIFO queue and drained by a single driver task. Envelopes are
//! stamped with a strictly increasing sequence number at post time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{SessionError, SessionResult};

/// One unit of work on the timeline
#[derive(Debug)]
pub struct Envelope<T> {
    pub seq: u64,
    pub item: T,
}

/// Posting side of the queue; cheap to clone
pub struct EventDispatcher<T> {
    tx: mpsc::UnboundedSender<Envelope<T>>,
    seq: Arc<AtomicU64>,
}

impl<T> Clone for EventDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            seq: self.seq.clone(),
        }
    }
}

impl<T> EventDispatcher<T> {
    /// Create a dispatcher and the queue its driver drains
    pub fn channel() -> (Self, DispatchQueue<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                seq: Arc::new(AtomicU64::new(0)),
            },
            DispatchQueue { rx, last_seq: 0 },
        )
    }

    /// Append an item to the timeline. Returns its sequence number.
    pub fn post(&self, item: T) -> SessionResult<u64> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx
            .send(Envelope { seq, item })
            .map_err(|_| SessionError::internal("event dispatcher is closed"))?;
        Ok(seq)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Number of envelopes posted so far
    pub fn posted(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}

/// Draining side of the queue, owned by the driver
pub struct DispatchQueue<T> {
    rx: mpsc::UnboundedReceiver<Envelope<T>>,
    last_seq: u64,
}

impl<T> DispatchQueue<T> {
    pub async fn next(&mut self) -> Option<Envelope<T>> {
        let envelope = self.rx.recv().await?;
        if envelope.seq <= self.last_seq {
            // Two posters raced between stamping and sending
            tracing::debug!(
                seq = envelope.seq,
                last_seq = self.last_seq,
                "Envelope arrived out of stamp order"
            );
        }
        self.last_seq = self.last_seq.max(envelope.seq);
        Some(envelope)
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Stop accepting new envelopes; queued ones can still be drained
    pub fn close(&mut self) {
        self.rx.close();
    }
}
