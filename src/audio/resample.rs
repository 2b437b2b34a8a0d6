//! Channel mixing and sample-rate conversion.
//!
//! The live service wants **16 kHz mono** capture and returns **24 kHz mono**
//! speech, while sound cards run at whatever rate and channel count they
//! prefer.  This module provides the two conversion steps used on both sides:
//!
//! 1. [`downmix_to_mono`]: average interleaved channels.
//! 2. [`StreamResampler`]: linear-interpolation resampling that carries its
//!    phase across calls, so consecutive audio callbacks join without clicks
//!    or drift.

// ---------------------------------------------------------------------------
// downmix_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// * `channels == 1` returns the input unchanged (as an owned `Vec`).
/// * `channels == 0` returns an empty vector.
///
/// ```rust
/// use farmer_assistant::audio::downmix_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

/// Streaming linear-interpolation resampler for mono audio.
///
/// Feed successive blocks through [`process`](Self::process); the read
/// position and the last input sample are kept between calls so the output
/// is identical to resampling the concatenated input in one go.
///
/// ```rust
/// use farmer_assistant::audio::StreamResampler;
///
/// // 48 kHz → 16 kHz, delivered in two uneven callbacks.
/// let mut rs = StreamResampler::new(48_000, 16_000);
/// let mut out = Vec::new();
/// rs.process(&vec![0.5_f32; 300], &mut out);
/// rs.process(&vec![0.5_f32; 180], &mut out);
/// assert_eq!(out.len(), 160);
/// ```
#[derive(Debug, Clone)]
pub struct StreamResampler {
    /// Input samples consumed per output sample.
    step: f64,
    /// Read position relative to the start of the next input block.
    /// Lies in `[-1, 0)` when interpolating between the previous block's
    /// last sample and the new block's first.
    pos: f64,
    prev: Option<f32>,
}

impl StreamResampler {
    /// Create a resampler converting `source_rate` Hz to `target_rate` Hz.
    ///
    /// # Panics
    ///
    /// Panics if either rate is zero.
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        assert!(
            source_rate > 0 && target_rate > 0,
            "sample rates must be > 0"
        );
        Self {
            step: source_rate as f64 / target_rate as f64,
            pos: 0.0,
            prev: None,
        }
    }

    /// `true` when input and output rates are equal.
    pub fn is_passthrough(&self) -> bool {
        self.step == 1.0
    }

    /// Resample `input`, appending the produced samples to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.is_passthrough() {
            out.extend_from_slice(input);
            return;
        }
        if input.is_empty() {
            return;
        }

        let len = input.len() as f64;
        let sample_at = |idx: isize, prev: Option<f32>| -> f32 {
            if idx < 0 {
                prev.unwrap_or(input[0])
            } else {
                input[idx as usize]
            }
        };

        // Interpolation needs the sample after `idx`, so stop one short.
        while self.pos + 1.0 < len {
            let idx = self.pos.floor();
            let frac = (self.pos - idx) as f32;
            let a = sample_at(idx as isize, self.prev);
            let b = sample_at(idx as isize + 1, self.prev);
            out.push(a + (b - a) * frac);
            self.pos += self.step;
        }

        self.pos -= len;
        self.prev = input.last().copied();
    }

    /// Forget the carried phase, e.g. between unrelated buffers.
    pub fn reset(&mut self) {
        self.pos = 0.0;
        self.prev = None;
    }
}

/// Number of samples `input_len` samples at `source_rate` span at
/// `target_rate`, rounded to the nearest sample.
pub fn output_len(input_len: usize, source_rate: u32, target_rate: u32) -> usize {
    if source_rate == 0 {
        return 0;
    }
    let num = input_len as u64 * target_rate as u64;
    ((num + source_rate as u64 / 2) / source_rate as u64) as usize
}

/// Resample a self-contained buffer to its nominal length
/// ([`output_len`]).
///
/// ```rust
/// use farmer_assistant::audio::resample;
///
/// assert_eq!(resample(&vec![0.1_f32; 2_400], 24_000, 44_100).len(), 4_410);
/// ```
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    let len = output_len(samples.len(), source_rate, target_rate);
    resample_to_len(samples, source_rate, target_rate, len)
}

/// Resample `samples` and return exactly `len` samples.
///
/// A streaming pass stops short of the last input sample while it waits
/// for the next block; here nothing follows, so the tail holds the last
/// input sample.  Extra output is truncated.
pub fn resample_to_len(samples: &[f32], source_rate: u32, target_rate: u32, len: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(len.max(samples.len()));
    if !samples.is_empty() && source_rate > 0 && target_rate > 0 {
        StreamResampler::new(source_rate, target_rate).process(samples, &mut out);
    }
    let hold = samples.last().copied().unwrap_or(0.0);
    out.resize(len, hold);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- downmix_to_mono ---------------------------------------------------

    #[test]
    fn downmix_already_mono() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&input, 1), input);
    }

    #[test]
    fn downmix_four_channel() {
        let out = downmix_to_mono(&[0.4_f32; 4], 4);
        assert_eq!(out.len(), 1);
        assert!((out[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn downmix_zero_channels() {
        assert!(downmix_to_mono(&[1.0_f32, 2.0], 0).is_empty());
    }

    // ---- StreamResampler ---------------------------------------------------

    #[test]
    fn passthrough_when_rates_match() {
        let input: Vec<f32> = (0..160).map(|i| i as f32 / 160.0).collect();
        assert_eq!(resample(&input, 16_000, 16_000), input);
    }

    #[test]
    fn downsample_48k_to_16k_length() {
        let out = resample(&vec![0.5_f32; 480], 48_000, 16_000);
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn upsample_24k_to_48k_length() {
        let out = resample(&vec![0.0_f32; 240], 24_000, 48_000);
        assert_eq!(out.len(), 480);
    }

    #[test]
    fn one_shot_output_spans_the_whole_input() {
        for (len, rate, expected) in [(2_400, 44_100, 4_410), (2_401, 44_100, 4_412), (2_400, 48_000, 4_800)] {
            let input: Vec<f32> = (0..len).map(|i| 0.1 + i as f32 * 1e-4).collect();
            let out = resample(&input, 24_000, rate);
            assert_eq!(out.len(), expected, "{len} samples at {rate} Hz");
            assert_eq!(out.last().copied(), input.last().copied());
        }
    }

    #[test]
    fn resample_to_len_truncates_and_pads() {
        assert_eq!(resample_to_len(&[0.2, 0.4], 16_000, 16_000, 1), vec![0.2]);
        assert_eq!(resample_to_len(&[0.2, 0.4], 16_000, 16_000, 4), vec![0.2, 0.4, 0.4, 0.4]);
        assert_eq!(resample_to_len(&[], 24_000, 48_000, 3), vec![0.0; 3]);
    }

    #[test]
    fn output_len_rounds_to_nearest() {
        assert_eq!(output_len(480, 48_000, 16_000), 160);
        assert_eq!(output_len(2_401, 24_000, 44_100), 4_412);
        assert_eq!(output_len(100, 0, 16_000), 0);
    }

    #[test]
    fn constant_signal_preserves_amplitude() {
        for &s in &resample(&vec![0.5_f32; 441], 44_100, 16_000) {
            assert!((s - 0.5).abs() < 1e-6, "amplitude drift: {s}");
        }
    }

    #[test]
    fn chunked_processing_matches_one_shot() {
        let input: Vec<f32> = (0..1_000).map(|i| (i as f32 * 0.01).sin()).collect();
        let whole = resample(&input, 44_100, 16_000);

        let mut rs = StreamResampler::new(44_100, 16_000);
        let mut pieces = Vec::new();
        for block in input.chunks(97) {
            rs.process(block, &mut pieces);
        }

        assert_eq!(whole.len(), pieces.len());
        for (a, b) in whole.iter().zip(&pieces) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    fn reset_drops_carried_phase() {
        let mut rs = StreamResampler::new(48_000, 16_000);
        let mut out = Vec::new();
        rs.process(&[0.1, 0.2], &mut out);
        rs.reset();
        out.clear();
        rs.process(&[0.9, 0.9, 0.9, 0.9], &mut out);
        assert!(out.iter().all(|&s| (s - 0.9).abs() < 1e-6));
    }

    #[test]
    #[should_panic(expected = "sample rates must be > 0")]
    fn zero_rate_panics() {
        let _ = StreamResampler::new(0, 16_000);
    }
}
