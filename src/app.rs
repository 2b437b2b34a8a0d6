//! Farmer assistant terminal front-end.
//!
//! # Architecture
//!
//! [`TerminalApp`] owns the chat controller and two channel endpoints:
//!
//! * `live_tx`: sends [`SessionCommand`] to the live session controller.
//! * `updates`: receives [`LiveUpdate`] (state changes, finished
//!   transcript entries) from that controller.
//!
//! [`run`](TerminalApp::run) multiplexes input lines, the open chat turn and
//! live updates, so replies stream while the user keeps typing.
//!
//! # Commands
//!
//! | Input | Effect |
//! |-------|--------|
//! | `/live start` · `/live stop` | Start or stop the voice session |
//! | `/lang <code>` | Switch language (resets chat, stops live) |
//! | `/langs` | List supported languages |
//! | `/view chat` · `/view live` | Switch view |
//! | `/image <path> [question]` | Attach an image to the next message |
//! | `/speak` | Read the last reply aloud again |
//! | `/dictate` | Start or stop dictating the next chat message |
//! | `/help` · `/quit` | |
//! | anything else | Chat message |

use std::io::Write;
use std::path::PathBuf;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::chat::{ChatError, ChatInput, ChatStreamController, ChatTurn, ImageAttachment, TurnEvent};
use crate::config::AppConfig;
use crate::dictation::{Dictation, DictationError, TranscriptJob};
use crate::live::{ConnectionState, LiveUpdate, SessionCommand};
use crate::prompt::CHAT_FAILURE_TEXT;
use crate::types::{Language, View, SUPPORTED_LANGUAGES};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    Chat(String),
    LiveStart,
    LiveStop,
    SetLanguage(Language),
    ListLanguages,
    SetView(View),
    AttachImage {
        path: PathBuf,
        caption: Option<String>,
    },
    Speak,
    Dictate,
    Help,
    Quit,
}

/// Input that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command /{0}; type /help for the list")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unsupported language {0:?}; type /langs for the list")]
    UnsupportedLanguage(String),
}

/// Parse one input line.  Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<AppCommand>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(AppCommand::Chat(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let cmd = match name.to_ascii_lowercase().as_str() {
        "live" => match arg.to_ascii_lowercase().as_str() {
            "start" => AppCommand::LiveStart,
            "stop" => AppCommand::LiveStop,
            _ => return Err(CommandError::Usage("/live start|stop")),
        },
        "lang" => {
            if arg.is_empty() {
                return Err(CommandError::Usage("/lang <code>"));
            }
            let language = Language::from_code(arg)
                .ok_or_else(|| CommandError::UnsupportedLanguage(arg.to_string()))?;
            AppCommand::SetLanguage(language)
        }
        "langs" => AppCommand::ListLanguages,
        "view" => AppCommand::SetView(View::parse(arg).ok_or(CommandError::Usage("/view chat|live"))?),
        "image" => {
            if arg.is_empty() {
                return Err(CommandError::Usage("/image <path> [question]"));
            }
            let (path, caption) = match arg.split_once(char::is_whitespace) {
                Some((path, caption)) => (path, Some(caption.trim().to_string())),
                None => (arg, None),
            };
            AppCommand::AttachImage {
                path: PathBuf::from(path),
                caption: caption.filter(|c| !c.is_empty()),
            }
        }
        "speak" => AppCommand::Speak,
        "dictate" | "mic" => AppCommand::Dictate,
        "help" => AppCommand::Help,
        "quit" | "exit" => AppCommand::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(cmd))
}

pub const HELP_TEXT: &str = "\
Commands:
  /live start | /live stop    start or stop the voice conversation
  /lang <code>                switch language, e.g. /lang hi-IN
  /langs                      list supported languages
  /view chat | /view live     switch view
  /image <path> [question]    attach an image to the next message
  /speak                      read the last reply aloud again
  /dictate                    start or stop dictating your next message
  /help                       show this help
  /quit                       exit
Anything else is sent as a chat message.";

/// One line per supported language, marking `current`.
pub fn language_list(current: Language) -> String {
    SUPPORTED_LANGUAGES
        .iter()
        .map(|l| {
            let marker = if *l == current { '*' } else { ' ' };
            format!("{marker} {:<6} {}", l.code, l.name)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// How a live update is shown.
pub fn render_update(update: &LiveUpdate, language: &Language) -> String {
    match update {
        LiveUpdate::State(state) => format!("[live] {}", state.status_text(language)),
        LiveUpdate::Transcript(entry) => format!("[live] {}: {}", entry.speaker.label(), entry.text),
    }
}

// ---------------------------------------------------------------------------
// TerminalApp
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Line-oriented front-end writing to `out`.
pub struct TerminalApp<W: Write> {
    chat: ChatStreamController,
    live_tx: mpsc::Sender<SessionCommand>,
    updates: mpsc::UnboundedReceiver<LiveUpdate>,
    out: W,

    config: AppConfig,
    /// Where language and view changes are saved; `None` keeps them in memory.
    settings_path: Option<PathBuf>,

    view: View,
    live_state: ConnectionState,
    turn: Option<ChatTurn>,
    staged_image: Option<ImageAttachment>,

    dictation: Option<Dictation>,
    dictation_job: Option<TranscriptJob>,
    /// Last transcript, sent by an empty input line.
    draft: Option<String>,
}

impl<W: Write> TerminalApp<W> {
    /// Create a new [`TerminalApp`].
    ///
    /// * `chat`   : chat controller, already bound to the configured language.
    /// * `live_tx`: sender end of the live session command channel.
    /// * `updates`: receiver end of the live update channel.
    /// * `config` : loaded application configuration.
    pub fn new(
        chat: ChatStreamController,
        live_tx: mpsc::Sender<SessionCommand>,
        updates: mpsc::UnboundedReceiver<LiveUpdate>,
        config: AppConfig,
        out: W,
    ) -> Self {
        Self {
            chat,
            live_tx,
            updates,
            out,
            view: config.view,
            config,
            settings_path: None,
            live_state: ConnectionState::Idle,
            turn: None,
            staged_image: None,
            dictation: None,
            dictation_job: None,
            draft: None,
        }
    }

    /// Enable `/dictate`.
    pub fn with_dictation(mut self, dictation: Dictation) -> Self {
        self.dictation = Some(dictation);
        self
    }

    /// Persist language and view changes to `path`.
    pub fn with_settings_path(mut self, path: PathBuf) -> Self {
        self.settings_path = Some(path);
        self
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Run until `/quit`, Ctrl-C or end of input.  At end of input an open
    /// reply is still streamed to completion.
    ///
    /// Dropping the app closes the live command channel, which stops the
    /// session controller.
    pub async fn run<R>(mut self, input: R) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        self.banner()?;

        let mut eof = false;
        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if self.handle_line(&line).await? == Flow::Quit {
                            break;
                        }
                    }
                    None => {
                        eof = true;
                        break;
                    }
                },
                event = next_turn_event(&mut self.chat, &mut self.turn) => self.show_turn_event(event)?,
                Some(update) = self.updates.recv() => self.show_update(update)?,
                result = join_dictation(&mut self.dictation_job) => self.show_transcript(result)?,
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        self.stop_dictation();

        if eof {
            while let Some(turn) = self.turn.as_mut() {
                let event = self.chat.advance(turn).await;
                self.show_turn_event(event)?;
            }
        }
        log::info!("front-end exiting");
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> std::io::Result<Flow> {
        match parse_command(line) {
            Ok(Some(cmd)) => self.handle(cmd).await,
            Ok(None) => match self.draft.take() {
                Some(text) if self.view == View::Chat && !self.chat.is_busy() => {
                    self.handle(AppCommand::Chat(text)).await
                }
                draft => {
                    if draft.is_some() && self.chat.is_busy() {
                        writeln!(self.out, "Please wait for the current reply to finish.")?;
                    }
                    self.draft = draft;
                    Ok(Flow::Continue)
                }
            },
            Err(e) => {
                writeln!(self.out, "{e}")?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle(&mut self, cmd: AppCommand) -> std::io::Result<Flow> {
        match cmd {
            AppCommand::Chat(text) => {
                if self.view == View::Live {
                    writeln!(self.out, "Switch to the chat view with /view chat to type messages.")?;
                } else {
                    self.draft = None;
                    let input = ChatInput {
                        text,
                        image: self.staged_image.take(),
                    };
                    self.send_chat(input)?;
                }
            }
            AppCommand::LiveStart => {
                if self.view != View::Live {
                    self.set_view(View::Live)?;
                }
                self.send_live(SessionCommand::Start).await;
            }
            AppCommand::LiveStop => self.send_live(SessionCommand::Stop).await,
            AppCommand::SetLanguage(language) => self.set_language(language).await?,
            AppCommand::ListLanguages => {
                writeln!(self.out, "{}", language_list(self.chat.language()))?;
            }
            AppCommand::SetView(view) => self.set_view(view)?,
            AppCommand::AttachImage { path, caption } => match ImageAttachment::from_file(&path) {
                Ok(image) => match caption {
                    Some(text) => self.send_chat(ChatInput {
                        text,
                        image: Some(image),
                    })?,
                    None => {
                        writeln!(self.out, "Image attached to your next message.")?;
                        self.staged_image = Some(image);
                    }
                },
                Err(e) => writeln!(self.out, "{e}")?,
            },
            AppCommand::Speak => match self.chat.last_bot_message().map(|m| m.id.clone()) {
                Some(id) if self.chat.speak_message(&id) => {}
                _ => writeln!(self.out, "Nothing to read aloud yet.")?,
            },
            AppCommand::Dictate => self.toggle_dictation()?,
            AppCommand::Help => writeln!(self.out, "{HELP_TEXT}")?,
            AppCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    fn send_chat(&mut self, input: ChatInput) -> std::io::Result<()> {
        if self.chat.is_busy() {
            if input.image.is_some() {
                self.staged_image = input.image;
            }
            writeln!(self.out, "Please wait for the current reply to finish.")?;
            return Ok(());
        }
        match self.chat.begin_turn(input) {
            Ok(Some(turn)) => {
                write!(self.out, "bot: ")?;
                self.out.flush()?;
                self.turn = Some(turn);
            }
            Ok(None) => {}
            Err(ChatError::Busy) => {
                writeln!(self.out, "Please wait for the current reply to finish.")?;
            }
            Err(e) => writeln!(self.out, "{e}")?,
        }
        Ok(())
    }

    async fn set_language(&mut self, language: Language) -> std::io::Result<()> {
        if language == self.chat.language() {
            return writeln!(self.out, "Already speaking {}.", language.name);
        }
        if self.turn.take().is_some() {
            writeln!(self.out)?;
        }
        self.chat.set_language(language);
        self.send_live(SessionCommand::SetLanguage(language)).await;
        // A clip recorded or transcribed in the old language is discarded.
        if self.stop_dictation() {
            writeln!(self.out, "Dictation cancelled.")?;
        }

        self.config.language = language.code.to_string();
        self.persist();
        writeln!(self.out, "Language set to {}.", language.name)?;
        writeln!(self.out, "bot: {}", self.chat.messages()[0].text)
    }

    fn set_view(&mut self, view: View) -> std::io::Result<()> {
        self.view = view;
        self.config.view = view;
        self.persist();
        match view {
            View::Chat => writeln!(self.out, "Chat view."),
            View::Live => writeln!(
                self.out,
                "Live view. {}",
                self.live_state.status_text(&self.chat.language())
            ),
        }
    }

    fn toggle_dictation(&mut self) -> std::io::Result<()> {
        if self.view == View::Live {
            return writeln!(self.out, "The live view already listens; use /view chat to dictate.");
        }
        if matches!(self.live_state, ConnectionState::Connecting | ConnectionState::Connected) {
            return writeln!(self.out, "Stop the live session with /live stop before dictating.");
        }
        let Some(dictation) = self.dictation.as_mut() else {
            return writeln!(self.out, "Dictation is not available.");
        };

        if dictation.is_listening() {
            match dictation.finish(self.chat.language()) {
                Ok(job) => {
                    self.dictation_job = Some(job);
                    writeln!(self.out, "Transcribing...")
                }
                Err(e) => writeln!(self.out, "{e}"),
            }
        } else if self.dictation_job.is_some() {
            writeln!(self.out, "Still transcribing the last recording.")
        } else {
            match dictation.start() {
                Ok(()) => writeln!(self.out, "Listening... type /dictate again when you are done."),
                Err(e) => writeln!(self.out, "{e}"),
            }
        }
    }

    /// Release the microphone, drop any pending transcript and the draft.
    /// Returns `true` if a recording or transcription was interrupted.
    fn stop_dictation(&mut self) -> bool {
        let mut interrupted = false;
        if let Some(dictation) = self.dictation.as_mut() {
            interrupted = dictation.is_listening();
            dictation.cancel();
        }
        if let Some(job) = self.dictation_job.take() {
            job.abort();
            interrupted = true;
        }
        self.draft = None;
        interrupted
    }

    async fn send_live(&mut self, cmd: SessionCommand) {
        if self.live_tx.send(cmd).await.is_err() {
            log::error!("live session controller is gone");
        }
    }

    fn persist(&self) {
        if let Some(path) = &self.settings_path {
            if let Err(e) = self.config.save_to(path) {
                log::warn!("Failed to save settings: {e}");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    fn banner(&mut self) -> std::io::Result<()> {
        let language = self.chat.language();
        writeln!(
            self.out,
            "Farmer Assistant ({}, {} view). Type /help for commands.",
            language.name,
            match self.view {
                View::Chat => "chat",
                View::Live => "live",
            }
        )?;
        writeln!(self.out, "bot: {}", self.chat.messages()[0].text)
    }

    fn show_turn_event(&mut self, event: Option<TurnEvent>) -> std::io::Result<()> {
        match event {
            Some(TurnEvent::Delta(delta)) => {
                write!(self.out, "{delta}")?;
                self.out.flush()
            }
            Some(TurnEvent::Completed(_)) => {
                self.turn = None;
                writeln!(self.out)
            }
            Some(TurnEvent::Failed(_)) => {
                self.turn = None;
                writeln!(self.out)?;
                writeln!(self.out, "bot: {CHAT_FAILURE_TEXT}")
            }
            None => {
                self.turn = None;
                Ok(())
            }
        }
    }

    fn show_transcript(&mut self, result: Result<String, DictationError>) -> std::io::Result<()> {
        match result {
            Ok(text) if text.is_empty() => writeln!(self.out, "Didn't catch that. Try /dictate again."),
            Ok(text) => {
                writeln!(self.out, "heard: {text}")?;
                writeln!(self.out, "Press Enter to send it, or type a message instead.")?;
                self.draft = Some(text);
                Ok(())
            }
            Err(e) => writeln!(self.out, "{e}"),
        }
    }

    fn show_update(&mut self, update: LiveUpdate) -> std::io::Result<()> {
        if let LiveUpdate::State(state) = update {
            self.live_state = state;
        }
        writeln!(self.out, "{}", render_update(&update, &self.chat.language()))
    }
}

async fn join_dictation(job: &mut Option<TranscriptJob>) -> Result<String, DictationError> {
    let Some(handle) = job.as_mut() else {
        return std::future::pending().await;
    };
    let result = match handle.await {
        Ok(result) => result,
        Err(e) => Err(DictationError::Task(e.to_string())),
    };
    *job = None;
    result
}

async fn next_turn_event(chat: &mut ChatStreamController, turn: &mut Option<ChatTurn>) -> Option<TurnEvent> {
    match turn.as_mut() {
        Some(turn) => chat.advance(turn).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
