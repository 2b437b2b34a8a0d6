//! Transcription of recorded clips.
//!
//! [`Transcriber`] is object-safe and `Send + Sync` so the front-end can hold
//! it as `Arc<dyn Transcriber>` and move calls onto a spawned task.
//! [`GeminiTranscriber`] uploads the clip as a WAV file to the
//! `generateContent` endpoint and returns the model's transcript.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::json;
use thiserror::Error;

use crate::audio::codec::to_i16;
use crate::audio::CaptureError;
use crate::chat::backend::parse_event;
use crate::chat::{ChatError, Content, Part};
use crate::config::{ApiConfig, DictationConfig};
use crate::prompt::dictation_instruction;
use crate::types::Language;

// ---------------------------------------------------------------------------
// DictationError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DictationError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("no speech was recorded; type /dictate and speak before stopping")]
    EmptyAudio,

    #[error("dictation is not listening")]
    NotListening,

    #[error("already listening; type /dictate again to stop")]
    AlreadyListening,

    /// The clip could not be packed into a WAV file.
    #[error("could not encode the recording: {0}")]
    Encode(String),

    #[error("transcription failed: {0}")]
    Transcription(#[from] ChatError),

    /// The background task panicked or was aborted.
    #[error("transcription task failed: {0}")]
    Task(String),
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

/// Mono `f32` samples captured between two `/dictate` commands.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Recording {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Pack `clip` as a 16-bit mono WAV file.
pub fn encode_wav(clip: &Recording) -> Result<Vec<u8>, DictationError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let encode_err = |e: hound::Error| DictationError::Encode(e.to_string());

    let mut cursor = Cursor::new(Vec::with_capacity(44 + clip.samples.len() * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(encode_err)?;
    for &sample in &clip.samples {
        writer.write_sample(to_i16(sample)).map_err(encode_err)?;
    }
    writer.finalize().map_err(encode_err)?;
    Ok(cursor.into_inner())
}

// ---------------------------------------------------------------------------
// Transcriber trait
// ---------------------------------------------------------------------------

/// Turns a recorded clip into text in the conversation language.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Returns the trimmed transcript; empty when nothing intelligible was
    /// said.
    async fn transcribe(&self, clip: Recording, language: Language) -> Result<String, DictationError>;
}

// ---------------------------------------------------------------------------
// GeminiTranscriber
// ---------------------------------------------------------------------------

/// Calls `{base_url}/v1beta/models/{model}:generateContent` with the clip as
/// inline `audio/wav` data.
pub struct GeminiTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiTranscriber {
    pub fn from_config(api: &ApiConfig, dictation: &DictationConfig, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(dictation.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: dictation.model.clone(),
        }
    }

    fn endpoint(&self) -> String {
        let model = self.model.strip_prefix("models/").unwrap_or(&self.model);
        format!("{}/v1beta/models/{model}:generateContent", self.base_url)
    }
}

/// Request body: one user turn holding the instruction and the clip.
fn request_body(wav: &[u8], language: &Language) -> serde_json::Value {
    let contents = vec![Content::user(vec![
        Part::text(dictation_instruction(language)),
        Part::inline_data("audio/wav", B64.encode(wav)),
    ])];
    json!({ "contents": contents })
}

#[async_trait]
impl Transcriber for GeminiTranscriber {
    async fn transcribe(&self, clip: Recording, language: Language) -> Result<String, DictationError> {
        if clip.samples.is_empty() {
            return Err(DictationError::EmptyAudio);
        }
        let wav = encode_wav(&clip)?;
        log::debug!(
            "dictation: uploading {:.1}s clip ({} bytes) to {}",
            clip.duration_secs(),
            wav.len(),
            self.model
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(&wav, &language))
            .send()
            .await
            .map_err(ChatError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let body = response.text().await.map_err(ChatError::from)?;
        let transcript = parse_event(&body)?.unwrap_or_default();
        Ok(transcript.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(samples: Vec<f32>) -> Recording {
        Recording {
            samples,
            sample_rate: 16_000,
        }
    }

    #[test]
    fn wav_has_riff_header_and_pcm16_payload() {
        let wav = encode_wav(&clip(vec![0.0, 0.5, -1.0])).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 3 * 2);

        let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![0, 16_384, -32_768]);
    }

    #[test]
    fn duration_follows_sample_rate() {
        assert_eq!(clip(vec![0.0; 8_000]).duration_secs(), 0.5);
        let silent = Recording {
            samples: vec![0.0; 10],
            sample_rate: 0,
        };
        assert_eq!(silent.duration_secs(), 0.0);
    }

    #[test]
    fn endpoint_uses_generate_content() {
        let t = GeminiTranscriber::from_config(&ApiConfig::default(), &DictationConfig::default(), "key");
        assert_eq!(
            t.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-lite:generateContent"
        );
    }

    #[test]
    fn request_carries_instruction_and_inline_wav() {
        let hindi = Language::from_code("hi-IN").unwrap();
        let body = request_body(b"RIFF", &hindi);
        let parts = &body["contents"][0]["parts"];
        assert_eq!(body["contents"][0]["role"], "user");
        assert!(parts[0]["text"].as_str().unwrap().contains("Hindi"));
        assert_eq!(parts[1]["inlineData"]["mimeType"], "audio/wav");
        assert_eq!(parts[1]["inlineData"]["data"], "UklGRg==");
    }

    #[tokio::test]
    async fn empty_clip_is_rejected_before_any_request() {
        let t = GeminiTranscriber::from_config(&ApiConfig::default(), &DictationConfig::default(), "key");
        let err = t.transcribe(clip(Vec::new()), Language::default()).await.unwrap_err();
        assert_eq!(err, DictationError::EmptyAudio);
    }

    #[test]
    fn transcriber_is_object_safe() {
        let t = GeminiTranscriber::from_config(&ApiConfig::default(), &DictationConfig::default(), "key");
        let _: std::sync::Arc<dyn Transcriber> = std::sync::Arc::new(t);
    }
}
