//! Console "renderer"
//!
//! Each subscribed track gets a consumer that counts frames and logs a line
//! every couple of seconds, the way a UI would update its texture or audio
//! buffer. The local camera preview uses the same consumer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use roomlink_media_session::{
    ConsumerHandle, ConsumerProvider, FrameConsumer, MediaFrame, Participant, Track,
};
use tracing::info;

#[derive(Debug, Default)]
pub struct RenderStats {
    pub video_frames: AtomicU64,
    pub audio_frames: AtomicU64,
    pub released: AtomicU64,
}

struct ConsoleConsumer {
    label: String,
    frames: u64,
    log_every: u64,
    stats: Arc<RenderStats>,
}

impl FrameConsumer for ConsoleConsumer {
    fn on_frame(&mut self, frame: &MediaFrame) {
        self.frames += 1;
        match frame {
            MediaFrame::Video(video) => {
                self.stats.video_frames.fetch_add(1, Ordering::Relaxed);
                if self.frames % self.log_every == 1 {
                    info!(
                        output = %self.label,
                        width = video.width,
                        height = video.height,
                        frames = self.frames,
                        "Rendered video frame"
                    );
                }
            }
            MediaFrame::Audio(audio) => {
                self.stats.audio_frames.fetch_add(1, Ordering::Relaxed);
                if self.frames % self.log_every == 1 {
                    info!(
                        output = %self.label,
                        samples = audio.samples.len(),
                        sample_rate = audio.sample_rate,
                        frames = self.frames,
                        "Played audio frame"
                    );
                }
            }
        }
    }

    fn on_release(&mut self) {
        self.stats.released.fetch_add(1, Ordering::Relaxed);
        info!(output = %self.label, frames = self.frames, "Output released");
    }
}

pub struct ConsoleRenderer {
    frame_rate: u64,
    stats: Arc<RenderStats>,
}

impl ConsoleRenderer {
    pub fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate: frame_rate.max(1) as u64,
            stats: Arc::new(RenderStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<RenderStats> {
        self.stats.clone()
    }

    /// On-screen camera view
    pub fn preview(&self) -> ConsumerHandle {
        self.consumer("local-preview".to_string(), self.frame_rate * 2)
    }

    fn consumer(&self, label: String, log_every: u64) -> ConsumerHandle {
        ConsumerHandle::new(
            label.clone(),
            ConsoleConsumer {
                label,
                frames: 0,
                log_every: log_every.max(1),
                stats: self.stats.clone(),
            },
        )
    }
}

impl ConsumerProvider for ConsoleRenderer {
    fn video_consumer(&self, track: &Track, participant: &Participant) -> ConsumerHandle {
        info!(sid = %track.sid, participant = %participant.identity, "Attaching video view");
        self.consumer(
            format!("video:{}:{}", participant.identity, track.sid),
            self.frame_rate * 2,
        )
    }

    fn audio_consumer(&self, track: &Track, participant: &Participant) -> ConsumerHandle {
        info!(sid = %track.sid, participant = %participant.identity, "Attaching audio output");
        // Audio arrives in 10 ms blocks
        self.consumer(format!("audio:{}:{}", participant.identity, track.sid), 200)
    }
}
