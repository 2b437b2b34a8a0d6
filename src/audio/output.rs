//! Native speaker output built on `cpal`.
//!
//! The output callback owns a sample-clock [`Timeline`]: every scheduled unit
//! is converted to the device rate and pinned to an absolute frame position.
//! Each callback mixes whatever units overlap the block it is rendering,
//! advances the clock, and reports units that have played out.
//!
//! The device clock is derived purely from rendered frames, so it stays
//! monotonic and never drifts relative to what the listener actually hears.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc::UnboundedSender;

use super::codec::DecodedAudio;
use super::playback::{PlaybackError, PlaybackOutput, PlaybackSink, UnitId};
use super::resample::resample_to_len;

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

struct ActiveUnit {
    id: UnitId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl ActiveUnit {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Frames the mix buffer holds before the first callback grows it.
const MIX_CAPACITY: usize = 8_192;

/// Mixer state shared between the output callback and the sink handle.
struct Timeline {
    /// Frames rendered so far.
    position: u64,
    units: Vec<ActiveUnit>,
    finished: UnboundedSender<UnitId>,
    /// Reused by every callback so rendering does not allocate.
    mix: Vec<f32>,
}

impl Timeline {
    fn new(finished: UnboundedSender<UnitId>) -> Self {
        Self {
            position: 0,
            units: Vec::new(),
            finished,
            mix: Vec::with_capacity(MIX_CAPACITY),
        }
    }

    /// Render `out.len() / channels` frames into interleaved `out`.
    fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let block_start = self.position;
        let block_end = block_start + frames as u64;

        let mix = &mut self.mix;
        mix.clear();
        mix.resize(frames, 0.0);
        for unit in &self.units {
            let from = unit.start_frame.max(block_start);
            let to = unit.end_frame().min(block_end);
            for t in from..to {
                mix[(t - block_start) as usize] += unit.samples[(t - unit.start_frame) as usize];
            }
        }

        for (frame, value) in out.chunks_exact_mut(channels).zip(mix.iter()) {
            let v = value.clamp(-1.0, 1.0);
            frame.iter_mut().for_each(|s| *s = v);
        }

        self.position = block_end;

        let finished = &self.finished;
        self.units.retain(|unit| {
            if unit.end_frame() <= block_end {
                // Receiver gone means the session is tearing down.
                let _ = finished.send(unit.id);
                false
            } else {
                true
            }
        });
    }

    fn insert(&mut self, id: UnitId, samples: Vec<f32>, start_frame: u64) {
        // A start already in the past plays from the current position.
        let start_frame = start_frame.max(self.position);
        self.units.push(ActiveUnit {
            id,
            start_frame,
            samples,
        });
    }

    fn cancel(&mut self, id: UnitId) {
        self.units.retain(|unit| unit.id != id);
    }
}

/// Convert a unit to the device rate and pin it to the device timeline.
///
/// Both ends are rounded from the same clock values the scheduler chains
/// units with, so a unit starting where the previous one ended shares its
/// boundary frame exactly: no gap and no overlap.
fn place_unit(audio: &DecodedAudio, start_at: f64, device_rate: u32) -> (u64, Vec<f32>) {
    let rate = device_rate as f64;
    let start_at = start_at.max(0.0);
    let start_frame = (start_at * rate).round() as u64;
    let end_frame = ((start_at + audio.duration()) * rate).round() as u64;
    let len = end_frame.saturating_sub(start_frame) as usize;
    let samples = resample_to_len(&audio.samples, audio.sample_rate, device_rate, len);
    (start_frame, samples)
}

fn lock_timeline(timeline: &Mutex<Timeline>) -> std::sync::MutexGuard<'_, Timeline> {
    match timeline.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// CpalPlaybackOutput
// ---------------------------------------------------------------------------

/// Opens the default (or a named) output device.
#[derive(Debug, Clone, Default)]
pub struct CpalPlaybackOutput {
    device_name: Option<String>,
}

impl CpalPlaybackOutput {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    fn find_device(&self, host: &cpal::Host) -> Result<cpal::Device, PlaybackError> {
        match &self.device_name {
            None => host
                .default_output_device()
                .ok_or_else(|| PlaybackError::DeviceUnavailable("no default output device".into())),
            Some(wanted) => host
                .output_devices()
                .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?
                .find(|d| d.name().map(|n| &n == wanted).unwrap_or(false))
                .ok_or_else(|| PlaybackError::DeviceUnavailable(format!("no output device named {wanted:?}"))),
        }
    }
}

impl PlaybackOutput for CpalPlaybackOutput {
    fn open(
        &self,
        sample_rate: u32,
        finished: UnboundedSender<UnitId>,
    ) -> Result<Box<dyn PlaybackSink>, PlaybackError> {
        let host = cpal::default_host();
        let device = self.find_device(&host)?;
        let supported = device
            .default_output_config()
            .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;

        let device_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let stream_config: cpal::StreamConfig = supported.into();

        let timeline = Arc::new(Mutex::new(Timeline::new(finished)));
        let callback_timeline = Arc::clone(&timeline);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match callback_timeline.try_lock() {
                    Ok(mut tl) => tl.render(data, channels),
                    // Never block the audio thread; emit one block of silence.
                    Err(_) => data.iter_mut().for_each(|s| *s = 0.0),
                },
                |err: cpal::StreamError| {
                    log::error!("playback stream error: {err}");
                },
                None,
            )
            .map_err(|e| PlaybackError::Stream(e.to_string()))?;

        stream.play().map_err(|e| PlaybackError::Stream(e.to_string()))?;

        log::info!("speaker opened ({sample_rate} Hz units → {device_rate} Hz × {channels} ch)");

        Ok(Box::new(CpalPlaybackSink {
            _stream: stream,
            timeline,
            device_rate,
        }))
    }
}

/// Handle returned by [`CpalPlaybackOutput::open`].  Dropping it closes the
/// device.
pub struct CpalPlaybackSink {
    _stream: cpal::Stream,
    timeline: Arc<Mutex<Timeline>>,
    device_rate: u32,
}

impl PlaybackSink for CpalPlaybackSink {
    fn current_time(&self) -> f64 {
        lock_timeline(&self.timeline).position as f64 / self.device_rate as f64
    }

    fn schedule(&mut self, id: UnitId, audio: &DecodedAudio, start_at: f64) {
        let (start_frame, samples) = place_unit(audio, start_at, self.device_rate);
        lock_timeline(&self.timeline).insert(id, samples, start_frame);
    }

    fn cancel(&mut self, id: UnitId) {
        lock_timeline(&self.timeline).cancel(id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
