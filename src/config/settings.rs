//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and handed to the
//! subsystems that own them.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::types::{Language, View};

use super::AppPaths;

/// Environment variables consulted, in order, when no key is configured.
pub const API_KEY_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];

// ---------------------------------------------------------------------------
// ApiConfig
// ---------------------------------------------------------------------------

/// Remote service endpoints and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API key.  `None` falls back to the environment (see
    /// [`API_KEY_ENV_VARS`]).
    pub api_key: Option<String>,
    /// REST base URL for the chat endpoint.
    pub base_url: String,
    /// WebSocket URL of the live endpoint.
    pub live_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com".into(),
            live_url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".into(),
        }
    }
}

impl ApiConfig {
    /// The configured key, or the first non-empty environment fallback.
    pub fn resolve_key(&self) -> Option<String> {
        self.resolve_key_with(|name| std::env::var(name).ok())
    }

    fn resolve_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                API_KEY_ENV_VARS
                    .iter()
                    .filter_map(|name| lookup(name))
                    .find(|k| !k.trim().is_empty())
            })
    }
}

// ---------------------------------------------------------------------------
// ChatConfig
// ---------------------------------------------------------------------------

/// Settings for the turn-based text/image chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Model used for streamed replies.
    pub model: String,
    /// Seconds to wait for the reply stream to open.
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-lite".into(),
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// LiveConfig
// ---------------------------------------------------------------------------

/// Settings for the live voice session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub model: String,
    /// Prebuilt voice the service speaks with.
    pub voice_name: String,
    /// Outbound capture rate in Hz.
    pub input_sample_rate: u32,
    /// Rate of inbound speech in Hz.
    pub output_sample_rate: u32,
    /// Samples per outbound frame.
    pub frame_size: usize,
    /// Seconds to wait for the service to acknowledge setup.
    pub setup_timeout_secs: u64,
    /// Audio input device name: `None` means the system default.
    pub input_device: Option<String>,
    /// Audio output device name: `None` means the system default.
    pub output_device: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-native-audio-preview-09-2025".into(),
            voice_name: "Zephyr".into(),
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            frame_size: 4_096,
            setup_timeout_secs: 15,
            input_device: None,
            output_device: None,
        }
    }
}

impl LiveConfig {
    /// Reset fields the audio pipeline cannot run with (zero rates, frame
    /// size or timeout) to their defaults.  Returns the names of the fields
    /// that were reset.
    pub fn sanitize(&mut self) -> Vec<&'static str> {
        let defaults = Self::default();
        let mut reset = Vec::new();
        if self.input_sample_rate == 0 {
            self.input_sample_rate = defaults.input_sample_rate;
            reset.push("live.input_sample_rate");
        }
        if self.output_sample_rate == 0 {
            self.output_sample_rate = defaults.output_sample_rate;
            reset.push("live.output_sample_rate");
        }
        if self.frame_size == 0 {
            self.frame_size = defaults.frame_size;
            reset.push("live.frame_size");
        }
        if self.setup_timeout_secs == 0 {
            self.setup_timeout_secs = defaults.setup_timeout_secs;
            reset.push("live.setup_timeout_secs");
        }
        reset
    }
}

// ---------------------------------------------------------------------------
// DictationConfig
// ---------------------------------------------------------------------------

/// Push-to-talk dictation into the chat input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DictationConfig {
    pub enabled: bool,
    /// Model that transcribes the recorded clip.
    pub model: String,
    /// Longest clip kept, in seconds; later audio is dropped.
    pub max_secs: u32,
    /// Seconds to wait for the transcription request.
    pub timeout_secs: u64,
}

impl Default for DictationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gemini-2.5-flash-lite".into(),
            max_secs: 60,
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// SpeechConfig
// ---------------------------------------------------------------------------

/// Local text-to-speech used to read chat replies aloud.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    /// Synthesizer executable.
    pub command: String,
    /// Arguments; `{text}`, `{lang}` and `{voice}` are substituted per
    /// utterance.
    pub args: Vec<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "espeak-ng".into(),
            args: vec!["-v".into(), "{voice}".into(), "{text}".into()],
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use farmer_assistant::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// BCP-47 code of the conversation language.
    pub language: String,
    /// View shown at startup.
    pub view: View,
    pub api: ApiConfig,
    pub chat: ChatConfig,
    pub live: LiveConfig,
    pub dictation: DictationConfig,
    pub speech: SpeechConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            language: Language::default().code.into(),
            view: View::default(),
            api: ApiConfig::default(),
            chat: ChatConfig::default(),
            live: LiveConfig::default(),
            dictation: DictationConfig::default(),
            speech: SpeechConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.sanitize();
        Ok(config)
    }

    /// Replace values that would stop the audio pipeline from starting.
    pub fn sanitize(&mut self) {
        let mut reset = self.live.sanitize();
        if self.dictation.max_secs == 0 {
            self.dictation.max_secs = DictationConfig::default().max_secs;
            reset.push("dictation.max_secs");
        }
        if self.dictation.timeout_secs == 0 {
            self.dictation.timeout_secs = DictationConfig::default().timeout_secs;
            reset.push("dictation.timeout_secs");
        }
        for field in reset {
            log::warn!("settings: {field} must be greater than zero, using the default");
        }
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The configured language, or English when the code is unknown.
    pub fn language(&self) -> Language {
        Language::from_code(&self.language).unwrap_or_else(|| {
            log::warn!("unsupported language {:?} in settings, using English", self.language);
            Language::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Verify that a default `AppConfig` can be serialised to TOML and
    /// deserialised back without any data loss.
    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original.language, loaded.language);
        assert_eq!(original.view, loaded.view);
        assert_eq!(original.api.base_url, loaded.api.base_url);
        assert_eq!(original.api.live_url, loaded.api.live_url);
        assert_eq!(original.api.api_key, loaded.api.api_key);
        assert_eq!(original.chat.model, loaded.chat.model);
        assert_eq!(original.live, loaded.live);
        assert_eq!(original.dictation, loaded.dictation);
        assert_eq!(original.speech.command, loaded.speech.command);
        assert_eq!(original.speech.args, loaded.speech.args);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config.language, "en-US");
        assert_eq!(config.live, LiveConfig::default());
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.view, View::Chat);
        assert_eq!(cfg.chat.model, "gemini-2.5-flash-lite");
        assert_eq!(cfg.live.model, "gemini-2.5-flash-native-audio-preview-09-2025");
        assert_eq!(cfg.live.voice_name, "Zephyr");
        assert_eq!(cfg.live.input_sample_rate, 16_000);
        assert_eq!(cfg.live.output_sample_rate, 24_000);
        assert_eq!(cfg.live.frame_size, 4_096);
        assert_eq!(cfg.live.setup_timeout_secs, 15);
        assert!(cfg.api.api_key.is_none());
        assert!(cfg.speech.enabled);
        assert!(cfg.dictation.enabled);
        assert_eq!(cfg.dictation.max_secs, 60);
    }

    /// Verify that modified non-default values survive a round trip.
    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.language = "mr-IN".into();
        cfg.view = View::Live;
        cfg.api.api_key = Some("test-key".into());
        cfg.live.voice_name = "Puck".into();
        cfg.live.input_device = Some("USB Mic".into());
        cfg.speech.enabled = false;

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.language().name, "Marathi");
        assert_eq!(loaded.view, View::Live);
        assert_eq!(loaded.api.api_key.as_deref(), Some("test-key"));
        assert_eq!(loaded.live.voice_name, "Puck");
        assert_eq!(loaded.live.input_device.as_deref(), Some("USB Mic"));
        assert!(!loaded.speech.enabled);
    }

    /// Partial files fill the gaps from defaults.
    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "language = \"ta-IN\"\n\n[live]\nvoice_name = \"Kore\"\n").unwrap();

        let loaded = AppConfig::load_from(&path).expect("load");
        assert_eq!(loaded.language, "ta-IN");
        assert_eq!(loaded.live.voice_name, "Kore");
        assert_eq!(loaded.live.frame_size, 4_096);
        assert_eq!(loaded.chat.model, ChatConfig::default().model);
    }

    /// Zero rates or frame sizes would panic the capture pipeline; loading
    /// replaces them and keeps the rest of the section.
    #[test]
    fn zero_audio_values_are_reset_on_load() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("zeros.toml");
        std::fs::write(
            &path,
            "[live]\nvoice_name = \"Kore\"\nframe_size = 0\ninput_sample_rate = 0\n\
             output_sample_rate = 0\nsetup_timeout_secs = 0\n\n[dictation]\nmax_secs = 0\n",
        )
        .unwrap();

        let loaded = AppConfig::load_from(&path).expect("load");
        assert_eq!(loaded.live.voice_name, "Kore");
        assert_eq!(loaded.live.frame_size, 4_096);
        assert_eq!(loaded.live.input_sample_rate, 16_000);
        assert_eq!(loaded.live.output_sample_rate, 24_000);
        assert_eq!(loaded.live.setup_timeout_secs, 15);
        assert_eq!(loaded.dictation.max_secs, 60);
    }

    #[test]
    fn sanitize_reports_only_reset_fields() {
        let mut live = LiveConfig {
            frame_size: 0,
            ..LiveConfig::default()
        };
        assert_eq!(live.sanitize(), vec!["live.frame_size"]);
        assert!(live.sanitize().is_empty());
        assert_eq!(live, LiveConfig::default());
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        let cfg = AppConfig {
            language: "fr-FR".into(),
            ..AppConfig::default()
        };
        assert_eq!(cfg.language(), Language::default());
    }

    #[test]
    fn configured_key_wins_over_environment() {
        let api = ApiConfig {
            api_key: Some("from-file".into()),
            ..ApiConfig::default()
        };
        let key = api.resolve_key_with(|_| Some("from-env".into()));
        assert_eq!(key.as_deref(), Some("from-file"));
    }

    #[test]
    fn environment_fallback_order() {
        let api = ApiConfig::default();
        let key = api.resolve_key_with(|name| match name {
            "GEMINI_API_KEY" => Some("  ".into()),
            "API_KEY" => Some("second".into()),
            _ => None,
        });
        assert_eq!(key.as_deref(), Some("second"));
        assert!(api.resolve_key_with(|_| None).is_none());
    }
}
