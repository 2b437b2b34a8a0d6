//! Fixed-size frame assembly for captured audio.
//!
//! Sound cards deliver callbacks of whatever length the driver chooses
//! (often 441, 480 or 512 frames), but the live session sends frames of a
//! fixed size.  [`FrameAccumulator`] buffers resampled mono samples and
//! hands back every complete frame as soon as it fills.
//!
//! # Example
//!
//! ```rust
//! use farmer_assistant::audio::FrameAccumulator;
//!
//! let mut acc = FrameAccumulator::new(4);
//! let frames = acc.push(&[1.0, 2.0, 3.0, 4.0, 5.0]);
//! assert_eq!(frames, vec![vec![1.0, 2.0, 3.0, 4.0]]);
//! assert_eq!(acc.pending(), 1);
//! ```

// ---------------------------------------------------------------------------
// FrameAccumulator
// ---------------------------------------------------------------------------

/// Collects samples and emits them in frames of exactly `frame_size`.
///
/// Leftover samples that do not yet fill a frame stay buffered until the
/// next [`push`](Self::push).  The buffer never holds more than
/// `frame_size - 1` samples between calls.
pub struct FrameAccumulator {
    pending: Vec<f32>,
    frame_size: usize,
}

impl FrameAccumulator {
    /// Create an accumulator producing frames of `frame_size` samples.
    ///
    /// # Panics
    ///
    /// Panics if `frame_size == 0`.
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame size must be > 0");
        Self {
            pending: Vec::with_capacity(frame_size),
            frame_size,
        }
    }

    /// Append `samples` and return every frame completed by them, oldest
    /// first.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let room = self.frame_size - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                frames.push(full);
            }
        }

        frames
    }

    /// Discard any partially filled frame.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Number of samples waiting for the current frame to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Duration of one frame in seconds at `sample_rate` Hz.
    pub fn frame_secs(&self, sample_rate: u32) -> f32 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.frame_size as f32 / sample_rate as f32
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
