//! PCM16 wire codec for the live session.
//!
//! Outbound frames are native `f32` samples in `[-1.0, 1.0]`; the remote
//! service expects little-endian signed 16-bit PCM, wrapped either in a
//! base64 text envelope (JSON transports) or sent as raw bytes (binary
//! transports).  Inbound audio arrives in the same representation and is
//! decoded back into a playback-ready [`DecodedAudio`] buffer.
//!
//! Both directions are pure functions; nothing here holds state.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use thiserror::Error;

/// Bytes per PCM16 sample.
pub const SAMPLE_WIDTH: usize = 2;

// ---------------------------------------------------------------------------
// Envelope / EncodedAudioChunk
// ---------------------------------------------------------------------------

/// How encoded PCM is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// Base64 text, for JSON message bodies.
    Base64,
    /// Raw little-endian bytes, for binary frames.
    Binary,
}

/// One wire-ready audio payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedAudioChunk {
    Base64(String),
    Binary(Vec<u8>),
}

impl EncodedAudioChunk {
    /// The payload as base64 text, encoding binary payloads on the fly.
    pub fn to_base64(&self) -> String {
        match self {
            EncodedAudioChunk::Base64(text) => text.clone(),
            EncodedAudioChunk::Binary(bytes) => B64.encode(bytes),
        }
    }

    /// Raw PCM bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        match self {
            EncodedAudioChunk::Base64(text) => B64
                .decode(text.as_bytes())
                .map_err(|e| DecodeError::Envelope(e.to_string())),
            EncodedAudioChunk::Binary(bytes) => Ok(bytes.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// DecodedAudio
// ---------------------------------------------------------------------------

/// Mono `f32` samples tagged with their sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Malformed inbound audio.  The offending payload is dropped; the session
/// carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("audio payload is {0} bytes, not a whole number of 16-bit samples")]
    OddLength(usize),

    #[error("audio envelope could not be decoded: {0}")]
    Envelope(String),
}

// ---------------------------------------------------------------------------
// encode / decode
// ---------------------------------------------------------------------------

/// Convert one frame of `f32` samples to PCM16 LE inside `envelope`.
///
/// Samples outside `[-1.0, 1.0]` are clamped first.
///
/// ```
/// use farmer_assistant::audio::codec::{encode, EncodedAudioChunk, Envelope};
///
/// let chunk = encode(&[0.0, 1.0, -1.0], Envelope::Binary);
/// assert_eq!(chunk, EncodedAudioChunk::Binary(vec![0x00, 0x00, 0xff, 0x7f, 0x00, 0x80]));
/// ```
pub fn encode(frame: &[f32], envelope: Envelope) -> EncodedAudioChunk {
    let mut bytes = Vec::with_capacity(frame.len() * SAMPLE_WIDTH);
    for &sample in frame {
        bytes.extend_from_slice(&to_i16(sample).to_le_bytes());
    }
    match envelope {
        Envelope::Binary => EncodedAudioChunk::Binary(bytes),
        Envelope::Base64 => EncodedAudioChunk::Base64(B64.encode(&bytes)),
    }
}

/// Convert a PCM16 LE payload back to `f32` samples at `sample_rate`.
///
/// # Errors
///
/// [`DecodeError::OddLength`] when the payload is not a multiple of two
/// bytes; [`DecodeError::Envelope`] when the base64 text is malformed.
pub fn decode(chunk: &EncodedAudioChunk, sample_rate: u32) -> Result<DecodedAudio, DecodeError> {
    let bytes = chunk.to_bytes()?;
    if bytes.len() % SAMPLE_WIDTH != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }
    let samples = bytes
        .chunks_exact(SAMPLE_WIDTH)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
        .collect();
    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

pub(crate) fn to_i16(sample: f32) -> i16 {
    let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    (clamped * 32_768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
