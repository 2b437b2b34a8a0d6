//! Microphone recording for dictation.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::audio::{CaptureConfig, CaptureSource, CaptureStream, FrameCallback};
use crate::types::Language;

use super::engine::{DictationError, Recording, Transcriber};

/// Capture rate for dictated clips.
pub const DICTATION_SAMPLE_RATE: u32 = 16_000;

/// 100 ms frames keep the trailing partial frame short.
const FRAME_SIZE: usize = 1_600;

/// Handle of a transcription running in the background.
pub type TranscriptJob = JoinHandle<Result<String, DictationError>>;

// ---------------------------------------------------------------------------
// DictationRecorder
// ---------------------------------------------------------------------------

/// Collects microphone audio between [`start`](Self::start) and
/// [`stop`](Self::stop).
///
/// Audio beyond `max_secs` is dropped, so a forgotten recording cannot grow
/// without bound.
pub struct DictationRecorder {
    source: Box<dyn CaptureSource>,
    config: CaptureConfig,
    max_samples: usize,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Box<dyn CaptureStream>>,
}

impl DictationRecorder {
    pub fn new(source: Box<dyn CaptureSource>, max_secs: u32) -> Self {
        Self {
            source,
            config: CaptureConfig {
                sample_rate: DICTATION_SAMPLE_RATE,
                frame_size: FRAME_SIZE,
            },
            max_samples: max_secs as usize * DICTATION_SAMPLE_RATE as usize,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the microphone and start collecting audio.
    pub fn start(&mut self) -> Result<(), DictationError> {
        if self.is_listening() {
            return Err(DictationError::AlreadyListening);
        }
        self.take_samples();

        let mut stream = self.source.acquire(self.config)?;
        let buffer = Arc::clone(&self.buffer);
        let max_samples = self.max_samples;
        let on_frame: FrameCallback = Box::new(move |frame| {
            // Contended or poisoned: drop this frame rather than block.
            let Ok(mut buf) = buffer.try_lock() else {
                return;
            };
            let room = max_samples.saturating_sub(buf.len());
            buf.extend(frame.samples.iter().take(room));
        });
        if let Err(e) = stream.start(on_frame) {
            stream.stop();
            return Err(e.into());
        }

        self.stream = Some(stream);
        log::info!("dictation: listening");
        Ok(())
    }

    /// Release the microphone and return what was heard.
    pub fn stop(&mut self) -> Result<Recording, DictationError> {
        let mut stream = self.stream.take().ok_or(DictationError::NotListening)?;
        stream.stop();
        let samples = self.take_samples();
        let clip = Recording {
            samples,
            sample_rate: DICTATION_SAMPLE_RATE,
        };
        log::info!("dictation: recorded {:.1}s", clip.duration_secs());
        Ok(clip)
    }

    /// Release the microphone and discard the recording.  Idempotent.
    pub fn cancel(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            log::info!("dictation: cancelled");
        }
        self.take_samples();
    }

    fn take_samples(&self) -> Vec<f32> {
        match self.buffer.lock() {
            Ok(mut buf) => std::mem::take(&mut *buf),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Drop for DictationRecorder {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ---------------------------------------------------------------------------
// Dictation
// ---------------------------------------------------------------------------

/// A recorder paired with the transcriber its clips are sent to.
pub struct Dictation {
    recorder: DictationRecorder,
    transcriber: Arc<dyn Transcriber>,
}

impl Dictation {
    pub fn new(recorder: DictationRecorder, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            recorder,
            transcriber,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.recorder.is_listening()
    }

    pub fn start(&mut self) -> Result<(), DictationError> {
        self.recorder.start()
    }

    /// Stop listening and transcribe the clip on a spawned task.
    ///
    /// Fails with [`DictationError::EmptyAudio`] when nothing was captured;
    /// no request is made in that case.
    pub fn finish(&mut self, language: Language) -> Result<TranscriptJob, DictationError> {
        let clip = self.recorder.stop()?;
        if clip.samples.is_empty() {
            log::warn!("dictation: recording was empty");
            return Err(DictationError::EmptyAudio);
        }
        let transcriber = Arc::clone(&self.transcriber);
        Ok(tokio::spawn(async move { transcriber.transcribe(clip, language).await }))
    }

    pub fn cancel(&mut self) {
        self.recorder.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
