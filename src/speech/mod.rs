//! Local text-to-speech for chat replies.
//!
//! [`SpeechController`] is the single owner of speech output.  It guarantees
//! at most one active utterance: every [`speak`](SpeechController::speak)
//! cancels whatever is still sounding before starting the new text.
//!
//! The synthesizer itself sits behind [`SpeechBackend`]; the shipped backend
//! is [`CommandSpeech`], which shells out to an external command such as
//! `espeak-ng`.
//!
//! ```text
//! speak(text, lang) ──▶ cancel prior ──▶ backend.speak(utterance, on_event)
//!                                              │
//!                          Started / Ended / Failed ──▶ speaking flag
//! ```

pub mod command;

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::types::Language;

pub use command::CommandSpeech;

// ---------------------------------------------------------------------------
// Events and errors
// ---------------------------------------------------------------------------

/// Lifecycle of one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEvent {
    Started,
    Ended,
    Failed,
}

/// The synthesizer could not be launched.  Failures after launch are
/// reported as [`SpeechEvent::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpeechError {
    #[error("speech synthesis unavailable: {0}")]
    Unavailable(String),
}

/// Text plus the language it should be voiced in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub language: Language,
}

/// Receives lifecycle events, possibly from another thread.
pub type SpeechCallback = Box<dyn Fn(SpeechEvent) + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// SpeechBackend
// ---------------------------------------------------------------------------

/// A platform synthesizer.
///
/// `speak` is fire-and-forget: it returns once the utterance has been
/// handed off, and reports progress through `on_event`.
pub trait SpeechBackend: Send + Sync {
    fn speak(&self, utterance: Utterance, on_event: SpeechCallback) -> Result<(), SpeechError>;

    /// Silence the current utterance, if any.  Must not invoke the
    /// utterance's callback synchronously.
    fn cancel(&self);
}

// ---------------------------------------------------------------------------
// SpeechController
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Tracker {
    generation: u64,
    speaking: bool,
}

/// Owns speech output for the application.
///
/// Cheap to clone; clones share the same backend and speaking state.
#[derive(Clone)]
pub struct SpeechController {
    backend: Arc<dyn SpeechBackend>,
    tracker: Arc<Mutex<Tracker>>,
}

impl SpeechController {
    pub fn new(backend: Arc<dyn SpeechBackend>) -> Self {
        Self {
            backend,
            tracker: Arc::new(Mutex::new(Tracker::default())),
        }
    }

    /// Speak `text` in `language`, cancelling any utterance in progress.
    ///
    /// Blank text is ignored.
    pub fn speak(&self, text: &str, language: Language) -> Result<(), SpeechError> {
        if text.trim().is_empty() {
            return Ok(());
        }

        // The lock must be released before calling into the backend, which
        // may report `Started` synchronously.
        let generation = {
            let mut tracker = self.lock();
            if tracker.speaking {
                self.backend.cancel();
            }
            tracker.generation += 1;
            tracker.speaking = false;
            tracker.generation
        };

        let tracker = Arc::clone(&self.tracker);
        let on_event: SpeechCallback = Box::new(move |event| {
            let mut tracker = tracker.lock().unwrap_or_else(PoisonError::into_inner);
            // Late events from a cancelled utterance must not touch the flag.
            if tracker.generation == generation {
                tracker.speaking = event == SpeechEvent::Started;
            }
            if event == SpeechEvent::Failed {
                log::warn!("speech: utterance {generation} failed");
            }
        });

        log::debug!("speech: utterance {generation} in {}", language.code);
        self.backend
            .speak(
                Utterance {
                    text: text.to_string(),
                    language,
                },
                on_event,
            )
            .inspect_err(|e| log::warn!("speech: {e}"))
    }

    pub fn is_speaking(&self) -> bool {
        self.lock().speaking
    }

    /// Silence output.  Safe to call repeatedly.
    pub fn cancel(&self) {
        let mut tracker = self.lock();
        tracker.generation += 1;
        if tracker.speaking {
            self.backend.cancel();
            tracker.speaking = false;
        }
    }

    /// Tear down before exit.
    pub fn shutdown(&self) {
        self.backend.cancel();
        let mut tracker = self.lock();
        tracker.generation += 1;
        tracker.speaking = false;
        log::debug!("speech: shut down");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSpeech;

    fn hindi() -> Language {
        Language::from_code("hi-IN").unwrap()
    }

    #[test]
    fn blank_text_is_not_spoken() {
        let backend = RecordingSpeech::new();
        let speech = SpeechController::new(Arc::new(backend.clone()));
        speech.speak("   \n", hindi()).unwrap();
        assert!(backend.spoken().is_empty());
        assert!(!speech.is_speaking());
    }

    #[test]
    fn speaking_flag_follows_events() {
        let backend = RecordingSpeech::new();
        let speech = SpeechController::new(Arc::new(backend.clone()));

        speech.speak("Namaste", hindi()).unwrap();
        assert!(speech.is_speaking());
        assert_eq!(backend.spoken(), vec![("Namaste".to_string(), "hi-IN")]);

        backend.emit(0, SpeechEvent::Ended);
        assert!(!speech.is_speaking());
    }

    #[test]
    fn new_utterance_cancels_the_previous_one() {
        let backend = RecordingSpeech::new();
        let speech = SpeechController::new(Arc::new(backend.clone()));

        speech.speak("first", Language::default()).unwrap();
        speech.speak("second", Language::default()).unwrap();
        assert_eq!(backend.cancels(), 1);

        // The cancelled utterance reports its end late; the new one is
        // still sounding.
        backend.emit(0, SpeechEvent::Ended);
        assert!(speech.is_speaking());

        backend.emit(1, SpeechEvent::Ended);
        assert!(!speech.is_speaking());
    }

    #[test]
    fn failure_clears_speaking() {
        let backend = RecordingSpeech::new();
        let speech = SpeechController::new(Arc::new(backend.clone()));
        speech.speak("text", Language::default()).unwrap();
        backend.emit(0, SpeechEvent::Failed);
        assert!(!speech.is_speaking());
    }

    #[test]
    fn backend_error_is_returned() {
        let speech = SpeechController::new(Arc::new(RecordingSpeech::failing()));
        assert!(matches!(
            speech.speak("text", Language::default()),
            Err(SpeechError::Unavailable(_))
        ));
        assert!(!speech.is_speaking());
    }

    #[test]
    fn cancel_and_shutdown_silence_output() {
        let backend = RecordingSpeech::new();
        let speech = SpeechController::new(Arc::new(backend.clone()));

        speech.speak("text", Language::default()).unwrap();
        speech.cancel();
        assert!(!speech.is_speaking());
        assert_eq!(backend.cancels(), 1);

        // Idle cancel does not reach the backend.
        speech.cancel();
        assert_eq!(backend.cancels(), 1);

        speech.shutdown();
        assert_eq!(backend.cancels(), 2);
    }
}
