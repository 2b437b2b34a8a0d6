//! Push-to-talk dictation for the chat view.
//!
//! # Flow
//!
//! ```text
//! /dictate ──▶ DictationRecorder::start ──▶ CaptureSource (16 kHz mono)
//!                                               │ frames
//!                                               ▼
//!                                        Arc<Mutex<Vec<f32>>>
//! /dictate ──▶ Dictation::finish ──▶ Recording ──▶ Transcriber ──▶ draft message
//! ```
//!
//! Recording reuses the microphone seam of the live session, so tests drive
//! it with the same capture double.  Transcription runs on a spawned task;
//! the front-end keeps reading input while it is in flight.

pub mod engine;
pub mod recorder;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use engine::{encode_wav, DictationError, GeminiTranscriber, Recording, Transcriber};
pub use recorder::{Dictation, DictationRecorder, TranscriptJob, DICTATION_SAMPLE_RATE};
