//! Gapless playback scheduling for inbound speech.
//!
//! The remote service streams speech as a series of short buffers that must
//! play back to back with no gap and no overlap, even though they arrive on
//! the network clock rather than the device clock.  [`PlaybackScheduler`]
//! keeps a running `next_start_time` on the device timeline and places each
//! buffer at `max(next_start_time, now)`.
//!
//! ```text
//! enqueue(a)      enqueue(b)                 interrupt()   enqueue(c)
//!   │               │                           │             │
//!   ▼               ▼                           ▼             ▼
//! ──[ a ][ b ]─────────────── device time ──────X────────────[ c ]──
//!                                          (all cancelled)  starts "now"
//! ```
//!
//! The device side is abstracted as [`PlaybackOutput`] / [`PlaybackSink`] so
//! the scheduler can be driven by a manual clock in tests and by the cpal
//! mixer in [`super::output`] at runtime.

use std::collections::HashSet;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use super::codec::DecodedAudio;

/// Identifies one scheduled buffer for completion and cancellation.
pub type UnitId = u64;

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("audio output device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio output stream failed: {0}")]
    Stream(String),
}

// ---------------------------------------------------------------------------
// Device traits
// ---------------------------------------------------------------------------

/// Opens an output timeline running at a fixed sample rate.
pub trait PlaybackOutput {
    /// Open the output device.  The sink reports every unit that finishes
    /// naturally by sending its id on `finished`.
    fn open(
        &self,
        sample_rate: u32,
        finished: UnboundedSender<UnitId>,
    ) -> Result<Box<dyn PlaybackSink>, PlaybackError>;
}

/// A device timeline that plays buffers at absolute times.
pub trait PlaybackSink {
    /// Current device clock in seconds.
    fn current_time(&self) -> f64;

    /// Play `audio` starting at `start_at` seconds on the device clock.
    fn schedule(&mut self, id: UnitId, audio: &DecodedAudio, start_at: f64);

    /// Stop unit `id` immediately.  Unknown or finished ids are ignored.
    fn cancel(&mut self, id: UnitId);
}

// ---------------------------------------------------------------------------
// ScheduledUnit
// ---------------------------------------------------------------------------

/// Where a buffer landed on the device timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledUnit {
    pub id: UnitId,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledUnit {
    pub fn end(&self) -> f64 {
        self.start_at + self.duration
    }
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

/// Places decoded buffers on a [`PlaybackSink`] back to back.
pub struct PlaybackScheduler {
    sink: Box<dyn PlaybackSink>,
    next_start_time: f64,
    active: HashSet<UnitId>,
    next_id: UnitId,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            sink,
            next_start_time: 0.0,
            active: HashSet::new(),
            next_id: 0,
        }
    }

    /// Schedule `audio` right after the previously scheduled buffer, or now
    /// if the timeline has already caught up.
    pub fn enqueue(&mut self, audio: DecodedAudio) -> ScheduledUnit {
        let now = self.sink.current_time();
        let start_at = self.next_start_time.max(now);
        let duration = audio.duration();

        self.next_id += 1;
        let id = self.next_id;
        self.sink.schedule(id, &audio, start_at);
        self.next_start_time = start_at + duration;
        self.active.insert(id);

        log::trace!("playback: unit {id} at {start_at:.3}s for {duration:.3}s");
        ScheduledUnit {
            id,
            start_at,
            duration,
        }
    }

    /// Record the natural end of unit `id`.
    pub fn complete(&mut self, id: UnitId) {
        self.active.remove(&id);
    }

    /// Stop every active unit and rewind the timeline.  Idempotent.
    pub fn interrupt(&mut self) {
        if !self.active.is_empty() {
            log::debug!("playback: interrupting {} unit(s)", self.active.len());
        }
        for id in self.active.drain() {
            self.sink.cancel(id);
        }
        self.next_start_time = 0.0;
    }

    /// Same as [`interrupt`](Self::interrupt); used on session teardown.
    pub fn reset(&mut self) {
        self.interrupt();
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
