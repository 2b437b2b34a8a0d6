//! Turn-based chat with streamed replies.
//!
//! [`ChatStreamController`] owns the visible history and the remote chat
//! session.  A turn is driven in two steps so a front-end can keep reading
//! input while a reply streams:
//!
//! ```text
//! begin_turn(input)          append user message + empty bot placeholder
//!   │                        (Busy while another turn is open)
//!   ▼
//! advance(&mut turn) ─▶ Delta(text)      text appended to the placeholder
//!                   ─▶ Completed(full)   reply spoken, busy cleared
//!                   ─▶ Failed(err)       failure message appended, busy cleared
//!                   ─▶ None              turn already over or abandoned
//! ```
//!
//! The remote session is created lazily on the first turn and discarded on
//! a language change, because its system instruction names the language.

use std::sync::Arc;

use futures_util::StreamExt;

use crate::prompt::{chat_instruction, CHAT_FAILURE_TEXT};
use crate::speech::SpeechController;
use crate::types::{Language, Speaker};

use super::backend::{ChatBackend, ChatError, Content, TextStream};
use super::message::{ChatInput, ChatMessage, ImageAttachment};

// ---------------------------------------------------------------------------
// Turn types
// ---------------------------------------------------------------------------

/// Progress of an open turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// A new increment, already appended to the bot message.
    Delta(String),
    /// The full reply.
    Completed(String),
    Failed(ChatError),
}

/// An open turn returned by [`ChatStreamController::begin_turn`].
pub struct ChatTurn {
    bot_id: String,
    request: Vec<Content>,
    stream: Option<TextStream>,
    reply: String,
    finished: bool,
}

impl ChatTurn {
    /// Id of the bot message this turn streams into.
    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }
}

/// Remote chat state bound to one language.
struct ChatSession {
    system_instruction: String,
    history: Vec<Content>,
}

// ---------------------------------------------------------------------------
// ChatStreamController
// ---------------------------------------------------------------------------

pub struct ChatStreamController {
    backend: Arc<dyn ChatBackend>,
    speech: Option<SpeechController>,
    language: Language,
    session: Option<ChatSession>,
    messages: Vec<ChatMessage>,
    /// Bot message id of the open turn.
    streaming: Option<String>,
}

impl ChatStreamController {
    pub fn new(backend: Arc<dyn ChatBackend>, language: Language) -> Self {
        Self {
            backend,
            speech: None,
            language,
            session: None,
            messages: vec![ChatMessage::greeting()],
            streaming: None,
        }
    }

    /// Speak finished replies through `speech`.
    pub fn with_speech(mut self, speech: SpeechController) -> Self {
        self.speech = Some(speech);
        self
    }

    // -----------------------------------------------------------------------
    // Turns
    // -----------------------------------------------------------------------

    /// Open a turn for `input`.
    ///
    /// Returns `Ok(None)` for empty input and [`ChatError::Busy`] while
    /// another turn is still streaming.
    pub fn begin_turn(&mut self, input: ChatInput) -> Result<Option<ChatTurn>, ChatError> {
        if self.streaming.is_some() {
            return Err(ChatError::Busy);
        }
        if input.is_empty() {
            return Ok(None);
        }

        let image_ref = input.image.as_ref().map(ImageAttachment::data_uri);
        self.messages.push(ChatMessage::user(input.text.clone(), image_ref));
        let placeholder = ChatMessage::bot("");
        let bot_id = placeholder.id.clone();
        self.messages.push(placeholder);

        let language = self.language;
        let session = self.session.get_or_insert_with(|| {
            log::debug!("chat: new session in {}", language.name);
            ChatSession {
                system_instruction: chat_instruction(&language),
                history: Vec::new(),
            }
        });
        session.history.push(Content::user(input.to_parts()));

        self.streaming = Some(bot_id.clone());
        Ok(Some(ChatTurn {
            bot_id,
            request: session.history.clone(),
            stream: None,
            reply: String::new(),
            finished: false,
        }))
    }

    /// Drive `turn` one step.
    ///
    /// Cancel-safe: dropping the future before it resolves leaves the turn
    /// resumable.
    pub async fn advance(&mut self, turn: &mut ChatTurn) -> Option<TurnEvent> {
        if turn.finished {
            return None;
        }
        if self.streaming.as_deref() != Some(turn.bot_id.as_str()) {
            // Language changed under the turn.
            turn.finished = true;
            return None;
        }

        if turn.stream.is_none() {
            let instruction = self
                .session
                .as_ref()
                .map(|s| s.system_instruction.clone())
                .unwrap_or_else(|| chat_instruction(&self.language));
            match self.backend.stream_reply(&instruction, turn.request.clone()).await {
                Ok(stream) => turn.stream = Some(stream),
                Err(e) => return Some(self.fail_turn(turn, e)),
            }
        }

        let next = match turn.stream.as_mut() {
            Some(stream) => stream.next().await,
            None => None,
        };
        match next {
            Some(Ok(delta)) => {
                turn.reply.push_str(&delta);
                if let Some(message) = self.message_mut(&turn.bot_id) {
                    message.text.push_str(&delta);
                }
                Some(TurnEvent::Delta(delta))
            }
            Some(Err(e)) => Some(self.fail_turn(turn, e)),
            None => Some(self.complete_turn(turn)),
        }
    }

    /// Run a whole turn, reporting each event to `on_event`.
    ///
    /// Returns the full reply, or `None` for empty input.
    pub async fn send(
        &mut self,
        input: ChatInput,
        mut on_event: impl FnMut(&TurnEvent),
    ) -> Result<Option<String>, ChatError> {
        let Some(mut turn) = self.begin_turn(input)? else {
            return Ok(None);
        };
        while let Some(event) = self.advance(&mut turn).await {
            on_event(&event);
            match event {
                TurnEvent::Delta(_) => {}
                TurnEvent::Completed(reply) => return Ok(Some(reply)),
                TurnEvent::Failed(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn complete_turn(&mut self, turn: &mut ChatTurn) -> TurnEvent {
        turn.finished = true;
        turn.stream = None;
        self.streaming = None;

        let reply = std::mem::take(&mut turn.reply);
        if let Some(session) = self.session.as_mut() {
            session.history.push(Content::model(reply.clone()));
        }
        log::info!("chat: reply complete ({} chars)", reply.chars().count());
        self.speak(&reply);
        TurnEvent::Completed(reply)
    }

    fn fail_turn(&mut self, turn: &mut ChatTurn, err: ChatError) -> TurnEvent {
        turn.finished = true;
        turn.stream = None;
        self.streaming = None;

        // The unanswered user turn must not stay in the remote history.
        if let Some(session) = self.session.as_mut() {
            session.history.pop();
        }
        log::error!("chat: reply failed: {err}");
        self.messages.push(ChatMessage::bot(CHAT_FAILURE_TEXT));
        TurnEvent::Failed(err)
    }

    // -----------------------------------------------------------------------
    // Language and speech
    // -----------------------------------------------------------------------

    /// Switch language: the history resets to the greeting and the remote
    /// session is dropped.  An open turn is abandoned.
    pub fn set_language(&mut self, language: Language) {
        if language == self.language {
            return;
        }
        log::info!("chat: language changed to {}", language.name);
        self.language = language;
        self.session = None;
        self.streaming = None;
        self.messages = vec![ChatMessage::greeting()];
        if let Some(speech) = &self.speech {
            speech.cancel();
        }
    }

    /// Speak a finished bot message again.  Returns `false` when `id` is not
    /// a bot message with text, or is still streaming.
    pub fn speak_message(&self, id: &str) -> bool {
        if self.streaming.as_deref() == Some(id) {
            return false;
        }
        match self
            .messages
            .iter()
            .find(|m| m.id == id && m.sender == Speaker::Bot && !m.text.is_empty())
        {
            Some(message) => {
                self.speak(&message.text);
                true
            }
            None => false,
        }
    }

    /// The most recent finished bot message with text.
    pub fn last_bot_message(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .filter(|m| self.streaming.as_deref() != Some(m.id.as_str()))
            .find(|m| m.sender == Speaker::Bot && !m.text.is_empty())
    }

    fn speak(&self, text: &str) {
        if let Some(speech) = &self.speech {
            // Speech failures are logged by the controller and never
            // affect the chat.
            let _ = speech.speak(text, self.language);
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    fn message_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_busy(&self) -> bool {
        self.streaming.is_some()
    }

    pub fn language(&self) -> Language {
        self.language
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::backend::Part;
    use crate::prompt::GREETING_ID;
    use crate::testing::{RecordingSpeech, ScriptedChat};

    fn controller(backend: &ScriptedChat) -> (ChatStreamController, RecordingSpeech) {
        let speech = RecordingSpeech::new();
        let ctl = ChatStreamController::new(Arc::new(backend.clone()), Language::default())
            .with_speech(SpeechController::new(Arc::new(speech.clone())));
        (ctl, speech)
    }

    fn texts(ctl: &ChatStreamController) -> Vec<(Speaker, String)> {
        ctl.messages()
            .iter()
            .map(|m| (m.sender, m.text.clone()))
            .collect()
    }

    #[test]
    fn history_starts_with_greeting() {
        let (ctl, _) = controller(&ScriptedChat::new());
        assert_eq!(ctl.messages().len(), 1);
        assert_eq!(ctl.messages()[0].id, GREETING_ID);
        assert!(!ctl.is_busy());
    }

    #[tokio::test]
    async fn reply_streams_into_placeholder_then_is_spoken() {
        let backend = ScriptedChat::new();
        backend.reply(&["Plant ", "after the ", "first rain."]);
        let (mut ctl, speech) = controller(&backend);

        let mut deltas = Vec::new();
        let reply = ctl
            .send(ChatInput::text("When should I sow cotton?"), |event| {
                if let TurnEvent::Delta(d) = event {
                    deltas.push(d.clone());
                }
            })
            .await
            .unwrap();

        assert_eq!(reply.as_deref(), Some("Plant after the first rain."));
        assert_eq!(deltas, vec!["Plant ", "after the ", "first rain."]);
        assert_eq!(
            texts(&ctl)[1..],
            [
                (Speaker::User, "When should I sow cotton?".to_string()),
                (Speaker::Bot, "Plant after the first rain.".to_string()),
            ]
        );
        assert_eq!(
            speech.spoken(),
            vec![("Plant after the first rain.".to_string(), "en-US")]
        );
        assert!(!ctl.is_busy());
    }

    #[tokio::test]
    async fn placeholder_grows_in_place_between_steps() {
        let backend = ScriptedChat::new();
        backend.reply(&["Neem ", "oil."]);
        let (mut ctl, _) = controller(&backend);

        let mut turn = ctl.begin_turn(ChatInput::text("Aphids?")).unwrap().unwrap();
        assert_eq!(ctl.messages().last().map(|m| m.text.as_str()), Some(""));

        assert_eq!(ctl.advance(&mut turn).await, Some(TurnEvent::Delta("Neem ".into())));
        let last = ctl.messages().last().unwrap();
        assert_eq!(last.id, turn.bot_id());
        assert_eq!(last.text, "Neem ");

        ctl.advance(&mut turn).await;
        assert_eq!(
            ctl.advance(&mut turn).await,
            Some(TurnEvent::Completed("Neem oil.".into()))
        );
        assert_eq!(ctl.advance(&mut turn).await, None);
        assert_eq!(ctl.messages().len(), 3);
    }

    #[tokio::test]
    async fn send_while_streaming_is_rejected() {
        let backend = ScriptedChat::new();
        backend.reply(&["one"]);
        backend.reply(&["two"]);
        let (mut ctl, _) = controller(&backend);

        let mut turn = ctl.begin_turn(ChatInput::text("first")).unwrap().unwrap();
        assert!(ctl.is_busy());
        assert_eq!(
            ctl.begin_turn(ChatInput::text("second")).err(),
            Some(ChatError::Busy)
        );
        assert_eq!(ctl.messages().len(), 3);

        while ctl.advance(&mut turn).await.is_some() {}
        assert!(!ctl.is_busy());
        assert!(ctl.begin_turn(ChatInput::text("second")).unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_input_is_ignored() {
        let backend = ScriptedChat::new();
        let (mut ctl, _) = controller(&backend);

        let reply = ctl.send(ChatInput::text("  "), |_| {}).await.unwrap();
        assert_eq!(reply, None);
        assert_eq!(ctl.messages().len(), 1);
        assert!(backend.requests().is_empty());
        assert!(!ctl.is_busy());
    }

    #[tokio::test]
    async fn image_only_turn_sends_inline_data() {
        let backend = ScriptedChat::new();
        backend.reply(&["Looks like rust fungus."]);
        let (mut ctl, _) = controller(&backend);

        let image = ImageAttachment::new("image/png", b"abc".to_vec());
        ctl.send(ChatInput::text("").with_image(image), |_| {})
            .await
            .unwrap();

        let user = &ctl.messages()[1];
        assert_eq!(user.text, "");
        assert_eq!(user.image_ref.as_deref(), Some("data:image/png;base64,YWJj"));

        let (_, contents) = &backend.requests()[0];
        assert_eq!(contents[0].parts, vec![Part::inline_data("image/png", "YWJj")]);
    }

    #[tokio::test]
    async fn session_is_created_lazily_with_language_instruction() {
        let backend = ScriptedChat::new();
        backend.reply(&["ok"]);
        let (mut ctl, _) = controller(&backend);
        ctl.set_language(Language::from_code("ta-IN").unwrap());
        assert!(backend.requests().is_empty());

        ctl.send(ChatInput::text("vanakkam"), |_| {}).await.unwrap();
        let (instruction, _) = &backend.requests()[0];
        assert!(instruction.ends_with("Respond ONLY in Tamil."));
    }

    #[tokio::test]
    async fn history_carries_previous_turns() {
        let backend = ScriptedChat::new();
        backend.reply(&["Loamy soil."]);
        backend.reply(&["Every week."]);
        let (mut ctl, _) = controller(&backend);

        ctl.send(ChatInput::text("Best soil?"), |_| {}).await.unwrap();
        ctl.send(ChatInput::text("How often to water?"), |_| {})
            .await
            .unwrap();

        let (_, contents) = &backend.requests()[1];
        let roles: Vec<_> = contents.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(contents[1], Content::model("Loamy soil."));
    }

    #[tokio::test]
    async fn stream_error_appends_failure_message() {
        let backend = ScriptedChat::new();
        backend.reply_then_fail(&["Partial "], ChatError::Stream("quota".into()));
        backend.reply(&["Recovered."]);
        let (mut ctl, speech) = controller(&backend);

        let err = ctl.send(ChatInput::text("Q1"), |_| {}).await.unwrap_err();
        assert_eq!(err, ChatError::Stream("quota".into()));
        assert!(!ctl.is_busy());
        assert_eq!(ctl.messages().last().map(|m| m.text.as_str()), Some(CHAT_FAILURE_TEXT));
        assert!(speech.spoken().is_empty());

        // The failed exchange is not part of the next request.
        ctl.send(ChatInput::text("Q2"), |_| {}).await.unwrap();
        let (_, contents) = &backend.requests()[1];
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].parts, vec![Part::text("Q2")]);
    }

    #[tokio::test]
    async fn refused_request_fails_the_turn() {
        let backend = ScriptedChat::new();
        backend.refuse(ChatError::Timeout);
        let (mut ctl, _) = controller(&backend);

        let err = ctl.send(ChatInput::text("hello"), |_| {}).await.unwrap_err();
        assert_eq!(err, ChatError::Timeout);
        assert_eq!(
            texts(&ctl).last().cloned(),
            Some((Speaker::Bot, CHAT_FAILURE_TEXT.to_string()))
        );
    }

    #[tokio::test]
    async fn language_change_resets_history_and_session() {
        let backend = ScriptedChat::new();
        backend.reply(&["Hi."]);
        backend.reply(&["Namaste."]);
        let (mut ctl, _) = controller(&backend);

        ctl.send(ChatInput::text("hello"), |_| {}).await.unwrap();
        assert_eq!(ctl.messages().len(), 3);

        ctl.set_language(Language::from_code("hi-IN").unwrap());
        assert_eq!(ctl.messages(), &[ChatMessage::greeting()]);

        ctl.send(ChatInput::text("namaste"), |_| {}).await.unwrap();
        let (instruction, contents) = &backend.requests()[1];
        assert!(instruction.contains("Hindi"));
        assert_eq!(contents.len(), 1);
    }

    #[tokio::test]
    async fn language_change_abandons_open_turn() {
        let backend = ScriptedChat::new();
        backend.reply(&["a", "b"]);
        let (mut ctl, speech) = controller(&backend);

        let mut turn = ctl.begin_turn(ChatInput::text("q")).unwrap().unwrap();
        ctl.advance(&mut turn).await;
        ctl.set_language(Language::from_code("bn-IN").unwrap());

        assert_eq!(ctl.advance(&mut turn).await, None);
        assert!(!ctl.is_busy());
        assert_eq!(ctl.messages().len(), 1);
        assert!(speech.spoken().is_empty());
    }

    #[tokio::test]
    async fn finished_bot_messages_can_be_spoken_again() {
        let backend = ScriptedChat::new();
        backend.reply(&["Use drip irrigation."]);
        let (mut ctl, speech) = controller(&backend);
        ctl.send(ChatInput::text("Save water?"), |_| {}).await.unwrap();

        let bot_id = ctl.last_bot_message().unwrap().id.clone();
        let user_id = ctl.messages()[1].id.clone();

        assert!(ctl.speak_message(&bot_id));
        assert!(ctl.speak_message(GREETING_ID));
        assert!(!ctl.speak_message(&user_id));
        assert!(!ctl.speak_message("missing"));
        assert_eq!(speech.spoken().len(), 3);
    }
}
