//! Shared vocabulary types: speakers, views and the supported languages.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Speaker
// ---------------------------------------------------------------------------

/// Who produced a chat message or transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Bot,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Bot => "bot",
        }
    }
}

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

/// Which interaction mode the front-end is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[default]
    Chat,
    Live,
}

impl View {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Some(View::Chat),
            "live" => Some(View::Live),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// A spoken/written language the assistant can converse in.
///
/// `code` is a BCP-47 tag (e.g. `"hi-IN"`) passed to the speech synthesizer;
/// `name` is the English display name injected into system instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    pub code: &'static str,
    pub name: &'static str,
}

pub const SUPPORTED_LANGUAGES: &[Language] = &[
    Language { code: "en-US", name: "English" },
    Language { code: "hi-IN", name: "Hindi" },
    Language { code: "bn-IN", name: "Bengali" },
    Language { code: "te-IN", name: "Telugu" },
    Language { code: "mr-IN", name: "Marathi" },
    Language { code: "ta-IN", name: "Tamil" },
    Language { code: "gu-IN", name: "Gujarati" },
];

impl Language {
    /// Look up a supported language by its tag (case-insensitive).
    ///
    /// ```
    /// use farmer_assistant::types::Language;
    ///
    /// assert_eq!(Language::from_code("hi-in").map(|l| l.name), Some("Hindi"));
    /// assert!(Language::from_code("fr-FR").is_none());
    /// ```
    pub fn from_code(code: &str) -> Option<Language> {
        SUPPORTED_LANGUAGES
            .iter()
            .find(|l| l.code.eq_ignore_ascii_case(code.trim()))
            .copied()
    }

    /// Primary subtag in lowercase (`"hi-IN"` → `"hi"`), except English which
    /// keeps its region because most synthesizers ship several English voices.
    pub fn voice_hint(&self) -> String {
        let lower = self.code.to_ascii_lowercase();
        if lower.starts_with("en") {
            return lower;
        }
        lower.split('-').next().unwrap_or(&lower).to_string()
    }
}

impl Default for Language {
    fn default() -> Self {
        SUPPORTED_LANGUAGES[0]
    }
}
