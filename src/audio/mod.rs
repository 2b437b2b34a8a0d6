//! Audio pipeline for the live voice session.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → downmix_to_mono → StreamResampler (16 kHz)
//!           → FrameAccumulator → AudioFrame → codec::encode → transport
//!
//! transport → codec::decode (24 kHz) → PlaybackScheduler → PlaybackSink → speaker
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use farmer_assistant::audio::{codec, CaptureConfig, CaptureSource, CpalCaptureSource};
//!
//! let mic = CpalCaptureSource::new(None);
//! let mut stream = mic
//!     .acquire(CaptureConfig { sample_rate: 16_000, frame_size: 4_096 })
//!     .unwrap();
//! stream
//!     .start(Box::new(|frame| {
//!         let chunk = codec::encode(&frame.samples, codec::Envelope::Base64);
//!         println!("{} bytes of base64", chunk.to_base64().len());
//!     }))
//!     .unwrap();
//! ```

pub mod buffer;
pub mod capture;
pub mod codec;
pub mod output;
pub mod playback;
pub mod resample;

pub use buffer::FrameAccumulator;
pub use capture::{
    AudioFrame, CaptureConfig, CaptureError, CaptureSource, CaptureStream, CpalCaptureSource,
    FrameCallback,
};
pub use codec::{DecodeError, DecodedAudio, EncodedAudioChunk, Envelope};
pub use output::CpalPlaybackOutput;
pub use playback::{
    PlaybackError, PlaybackOutput, PlaybackScheduler, PlaybackSink, ScheduledUnit, UnitId,
};
pub use resample::{downmix_to_mono, output_len, resample, resample_to_len, StreamResampler};
