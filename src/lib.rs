//! Farmer Assistant: a bilingual farming helper with a streamed text/image
//! chat and a live, interruptible voice conversation.
//!
//! * [`chat`]: turn-based chat with streamed replies.
//! * [`live`]: real-time voice session (capture, transport, playback).
//! * [`audio`]: PCM16 codec, resampling, capture and gapless playback.
//! * [`dictation`]: push-to-talk transcription into the chat input.
//! * [`speech`]: local text-to-speech for chat replies.
//! * [`config`]: `settings.toml` persistence.
//! * [`app`]: terminal front-end.

pub mod app;
pub mod audio;
pub mod chat;
pub mod config;
pub mod dictation;
pub mod live;
pub mod prompt;
pub mod speech;
pub mod types;

#[cfg(test)]
mod testing;
