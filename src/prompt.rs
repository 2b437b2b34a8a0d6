//! System instructions and canned texts for the farming assistant.
//!
//! Both remote services bind their system instruction when a chat or live
//! session is created, so every builder here takes the active [`Language`]
//! and the resulting string must not outlive a language change.

use crate::types::Language;

/// Id of the greeting message that opens every chat history.
pub const GREETING_ID: &str = "1";

/// First bot message shown in the chat view.
pub const GREETING_TEXT: &str =
    "Hello! How can I help you today? Ask me about your crops, soil, or any farming questions.";

/// Bot message appended when a streamed reply fails.
pub const CHAT_FAILURE_TEXT: &str = "Sorry, I encountered an error. Please try again.";

/// System instruction for the turn-based chat.
///
/// ```
/// use farmer_assistant::prompt::chat_instruction;
/// use farmer_assistant::types::Language;
///
/// let lang = Language::from_code("hi-IN").unwrap();
/// assert!(chat_instruction(&lang).ends_with("Respond ONLY in Hindi."));
/// ```
pub fn chat_instruction(language: &Language) -> String {
    format!(
        "You are a helpful farming assistant. The user is speaking {name}. Respond ONLY in {name}.",
        name = language.name
    )
}

/// System instruction for the live voice session.
pub fn live_instruction(language: &Language) -> String {
    format!(
        "You are a friendly and helpful agricultural assistant for farmers. \
         The user is speaking {name}. Respond ONLY in {name}. \
         Keep your answers concise and clear.",
        name = language.name
    )
}

/// Instruction sent with a dictated clip.  The reply must be the bare
/// transcript so it can be used as the next chat message.
pub fn dictation_instruction(language: &Language) -> String {
    format!(
        "Transcribe this recording of a farmer speaking {name}. \
         Reply with the transcript only, written in {name}, with no commentary. \
         If nothing intelligible was said, reply with an empty message.",
        name = language.name
    )
}
