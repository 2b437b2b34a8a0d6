//! Microphone capture.
//!
//! [`CaptureSource`] is the platform seam: it opens the microphone and
//! returns a [`CaptureStream`] handle.  Frame delivery is a second step
//! ([`CaptureStream::start`]) so the session can hold the microphone while
//! the remote handshake is still in flight and only begin sending once the
//! service is ready.
//!
//! [`CpalCaptureSource`] is the native implementation.  Its audio callback
//! runs on cpal's dedicated thread and does only non-blocking work:
//! downmix, resample to the requested rate, cut into fixed-size frames and
//! hand each frame to the registered [`FrameCallback`].

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::buffer::FrameAccumulator;
use super::resample::{downmix_to_mono, StreamResampler};

// ---------------------------------------------------------------------------
// AudioFrame
// ---------------------------------------------------------------------------

/// A fixed-length slice of mono `f32` samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Receives frames on the audio thread.  Must return quickly and never block.
pub type FrameCallback = Box<dyn FnMut(AudioFrame) + Send + 'static>;

/// Requested capture format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
}

impl CaptureConfig {
    /// Reject formats the resampler and frame accumulator cannot run with.
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.sample_rate == 0 {
            return Err(CaptureError::InvalidConfig("sample rate must be > 0".into()));
        }
        if self.frame_size == 0 {
            return Err(CaptureError::InvalidConfig("frame size must be > 0".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while acquiring or starting the microphone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The user or platform refused microphone access.
    #[error("microphone access was denied")]
    PermissionDenied,

    /// No usable capture hardware.
    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The requested capture format cannot be produced.
    #[error("invalid capture format: {0}")]
    InvalidConfig(String),
}

impl CaptureError {
    /// Classify a backend error message.  cpal has no dedicated permission
    /// variant; platforms report it through backend-specific text.
    pub fn from_backend(err: impl std::fmt::Display) -> Self {
        let text = err.to_string();
        let lower = text.to_ascii_lowercase();
        if ["permission", "denied", "not authorized", "not permitted"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            CaptureError::PermissionDenied
        } else {
            CaptureError::DeviceUnavailable(text)
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Opens microphone streams.
pub trait CaptureSource {
    /// Request microphone access and open the hardware stream.
    ///
    /// No frames are delivered until [`CaptureStream::start`] is called.
    fn acquire(&self, config: CaptureConfig) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// A live microphone handle.
pub trait CaptureStream {
    /// Begin delivering frames to `on_frame`, replacing any previous callback.
    fn start(&mut self, on_frame: FrameCallback) -> Result<(), CaptureError>;

    /// Stop frame delivery and release the hardware.  Idempotent.
    fn stop(&mut self);

    /// `true` once [`stop`](Self::stop) has released the hardware.
    fn is_released(&self) -> bool;
}

// ---------------------------------------------------------------------------
// CpalCaptureSource
// ---------------------------------------------------------------------------

/// Microphone capture built on top of `cpal`.
///
/// # Example
///
/// ```rust,no_run
/// use farmer_assistant::audio::{CaptureConfig, CaptureSource, CpalCaptureSource};
///
/// let source = CpalCaptureSource::new(None);
/// let mut mic = source
///     .acquire(CaptureConfig { sample_rate: 16_000, frame_size: 4_096 })
///     .unwrap();
/// mic.start(Box::new(|frame| println!("{} samples", frame.samples.len())))
///     .unwrap();
/// // ...
/// mic.stop();
/// ```
#[derive(Debug, Clone, Default)]
pub struct CpalCaptureSource {
    /// Input device name; `None` selects the system default.
    device_name: Option<String>,
}

impl CpalCaptureSource {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    fn find_device(&self, host: &cpal::Host) -> Result<cpal::Device, CaptureError> {
        match &self.device_name {
            None => host
                .default_input_device()
                .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".into())),
            Some(wanted) => host
                .input_devices()
                .map_err(CaptureError::from_backend)?
                .find(|d| d.name().map(|n| &n == wanted).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceUnavailable(format!("no input device named {wanted:?}"))),
        }
    }
}

/// State shared between the cpal callback and the owning handle.
struct FrameSink {
    resampler: StreamResampler,
    accumulator: FrameAccumulator,
    sample_rate: u32,
    on_frame: FrameCallback,
}

type SharedSink = Arc<Mutex<Option<FrameSink>>>;

impl CaptureSource for CpalCaptureSource {
    fn acquire(&self, config: CaptureConfig) -> Result<Box<dyn CaptureStream>, CaptureError> {
        config.validate()?;
        let host = cpal::default_host();
        let device = self.find_device(&host)?;
        let supported = device
            .default_input_config()
            .map_err(CaptureError::from_backend)?;

        let native_rate = supported.sample_rate().0;
        if native_rate == 0 {
            return Err(CaptureError::DeviceUnavailable("device reports a 0 Hz input rate".into()));
        }
        let channels = supported.channels();
        let stream_config: cpal::StreamConfig = supported.into();

        let sink: SharedSink = Arc::new(Mutex::new(None));
        let callback_sink = Arc::clone(&sink);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Contended or poisoned: drop this block rather than wait.
                    let Ok(mut guard) = callback_sink.try_lock() else {
                        return;
                    };
                    let Some(sink) = guard.as_mut() else {
                        return;
                    };
                    let mono = downmix_to_mono(data, channels);
                    let mut resampled = Vec::with_capacity(mono.len());
                    sink.resampler.process(&mono, &mut resampled);
                    for samples in sink.accumulator.push(&resampled) {
                        (sink.on_frame)(AudioFrame {
                            samples,
                            sample_rate: sink.sample_rate,
                        });
                    }
                },
                |err: cpal::StreamError| {
                    log::error!("capture stream error: {err}");
                },
                None,
            )
            .map_err(CaptureError::from_backend)?;

        stream.play().map_err(CaptureError::from_backend)?;

        log::info!(
            "microphone acquired ({native_rate} Hz × {channels} ch → {} Hz, {} samples/frame)",
            config.sample_rate,
            config.frame_size
        );

        Ok(Box::new(CpalCaptureStream {
            stream: Some(stream),
            sink,
            native_rate,
            config,
        }))
    }
}

/// Handle returned by [`CpalCaptureSource::acquire`].
///
/// Dropping it releases the hardware just like [`CaptureStream::stop`].
pub struct CpalCaptureStream {
    stream: Option<cpal::Stream>,
    sink: SharedSink,
    native_rate: u32,
    config: CaptureConfig,
}

impl CpalCaptureStream {
    fn set_sink(&self, value: Option<FrameSink>) {
        match self.sink.lock() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

impl CaptureStream for CpalCaptureStream {
    fn start(&mut self, on_frame: FrameCallback) -> Result<(), CaptureError> {
        if self.stream.is_none() {
            return Err(CaptureError::DeviceUnavailable("capture stream already released".into()));
        }
        self.set_sink(Some(FrameSink {
            resampler: StreamResampler::new(self.native_rate, self.config.sample_rate),
            accumulator: FrameAccumulator::new(self.config.frame_size),
            sample_rate: self.config.sample_rate,
            on_frame,
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.set_sink(None);
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("pausing capture stream failed: {e}");
            }
            drop(stream);
            log::info!("microphone released");
        }
    }

    fn is_released(&self) -> bool {
        self.stream.is_none()
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_frame_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AudioFrame>();
        assert_send::<FrameCallback>();
    }

    #[test]
    fn permission_messages_map_to_permission_denied() {
        assert_eq!(
            CaptureError::from_backend("Access denied by user"),
            CaptureError::PermissionDenied
        );
        assert_eq!(
            CaptureError::from_backend("The app is not authorized to record"),
            CaptureError::PermissionDenied
        );
    }

    #[test]
    fn other_backend_messages_map_to_device_unavailable() {
        let err = CaptureError::from_backend("The requested device is no longer available");
        assert!(matches!(err, CaptureError::DeviceUnavailable(msg) if msg.contains("no longer")));
    }

    #[test]
    fn zero_rate_or_frame_size_is_rejected() {
        let ok = CaptureConfig { sample_rate: 16_000, frame_size: 4_096 };
        assert_eq!(ok.validate(), Ok(()));

        let no_rate = CaptureConfig { sample_rate: 0, ..ok };
        assert!(matches!(no_rate.validate(), Err(CaptureError::InvalidConfig(msg)) if msg.contains("sample rate")));

        let no_frames = CaptureConfig { frame_size: 0, ..ok };
        assert!(matches!(no_frames.validate(), Err(CaptureError::InvalidConfig(msg)) if msg.contains("frame size")));
    }

    #[test]
    fn capture_source_is_object_safe() {
        let _: Box<dyn CaptureSource> = Box::new(CpalCaptureSource::new(None));
    }
}
