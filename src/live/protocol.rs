//! Gemini Live wire messages.
//!
//! The session speaks JSON over a WebSocket:
//!
//! 1. **Setup**: the first client frame binds model, voice, system
//!    instruction and transcription options for the whole session.
//! 2. **Realtime input**: each captured frame travels as
//!    `{"realtimeInput":{"mediaChunks":[{"mimeType":"audio/pcm;rate=16000","data":"<b64>"}]}}`.
//! 3. **Server messages**: `setupComplete`, then `serverContent` carrying
//!    audio parts, transcription fragments, `turnComplete` and
//!    `interrupted` flags, or a top-level `error`.
//!
//! The server may deliver JSON inside binary frames; the transport hands
//! both kinds to [`parse_server_message`] as text.

use serde::Serialize;
use serde_json::Value;

/// MIME type of outbound realtime audio.
pub const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Instruction,
    pub input_audio_transcription: Empty,
    pub output_audio_transcription: Empty,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Instruction {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Serializes as `{}`; enables a feature that takes no options.
#[derive(Debug, Default, Serialize)]
pub struct Empty {}

/// Build the first frame of a session.
///
/// `model` may be given with or without the `models/` prefix.
pub fn build_setup_message(model: &str, voice_name: &str, system_instruction: &str) -> SetupMessage {
    let model = if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    };
    SetupMessage {
        setup: SetupPayload {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice_name.to_string(),
                        },
                    },
                },
            },
            system_instruction: Instruction {
                parts: vec![TextPart {
                    text: system_instruction.to_string(),
                }],
            },
            input_audio_transcription: Empty::default(),
            output_audio_transcription: Empty::default(),
        },
    }
}

// ---------------------------------------------------------------------------
// Realtime input
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    /// Base64 PCM16 LE.
    pub data: String,
}

/// Wrap one base64 PCM16 frame for sending.
pub fn build_audio_message(base64_pcm: String) -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: INPUT_AUDIO_MIME.to_string(),
                data: base64_pcm,
            }],
        },
    }
}

// ---------------------------------------------------------------------------
// Server messages
// ---------------------------------------------------------------------------

/// One fact extracted from a server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    SetupComplete,
    /// Base64 PCM16 LE at 24 kHz.
    Audio(String),
    InputTranscription(String),
    OutputTranscription(String),
    TurnComplete,
    Interrupted,
    Error(String),
}

/// Split a server message into events.
///
/// Order within one message: setup ack, transcription fragments, turn
/// completion, audio, interruption, error.  Fragments therefore land in the
/// assembler before the turn they belong to is finalized.
///
/// Malformed JSON yields no events.
pub fn parse_server_message(json_text: &str) -> Vec<ServerEvent> {
    let value: Value = match serde_json::from_str(json_text) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("live: ignoring malformed server message: {e}");
            return Vec::new();
        }
    };

    let mut events = Vec::new();

    if value.get("setupComplete").is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    let content = value.get("serverContent");

    // Transcriptions normally sit under serverContent; older revisions put
    // them at the top level.
    if let Some(text) = transcription(&value, "inputTranscription") {
        events.push(ServerEvent::InputTranscription(text));
    }
    if let Some(text) = transcription(&value, "outputTranscription") {
        events.push(ServerEvent::OutputTranscription(text));
    }

    if let Some(content) = content {
        if content.get("turnComplete").and_then(Value::as_bool) == Some(true) {
            events.push(ServerEvent::TurnComplete);
        }

        if let Some(parts) = content.pointer("/modelTurn/parts").and_then(Value::as_array) {
            for part in parts {
                if let Some(data) = part.pointer("/inlineData/data").and_then(Value::as_str) {
                    events.push(ServerEvent::Audio(data.to_string()));
                }
            }
        }

        if content.get("interrupted").and_then(Value::as_bool) == Some(true) {
            events.push(ServerEvent::Interrupted);
        }
    }

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown server error");
        events.push(ServerEvent::Error(message.to_string()));
    }

    events
}

fn transcription(value: &Value, key: &str) -> Option<String> {
    value
        .pointer(&format!("/serverContent/{key}"))
        .or_else(|| value.get(key))
        .and_then(|t| t.get("text"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
