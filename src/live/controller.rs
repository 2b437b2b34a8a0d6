//! Live session orchestrator: drives microphone → remote → speaker.
//!
//! [`SessionController`] owns every piece of per-session state (capture
//! handle, playback timeline, remote connection, transcript buffers) and is
//! the only place that mutates it.  Commands from the front-end arrive over
//! a `tokio::sync::mpsc` channel; remote events, handshake completion and
//! playback completion are multiplexed with them in [`run`](SessionController::run).
//!
//! # Session flow
//!
//! ```text
//! Start
//!   └─▶ acquire microphone (16 kHz) + open speaker (24 kHz)   [Connecting]
//!         └─▶ spawn connector.connect(setup)
//!               ├─ Ok  → start capture: frame → encode → send  [Connected]
//!               └─ Err → teardown                              [Error]
//!
//! LiveEvent::Audio        → decode → PlaybackScheduler::enqueue
//! LiveEvent::*Transcription → TranscriptAssembler
//! LiveEvent::TurnComplete → append user, then bot entry
//! LiveEvent::Interrupted  → PlaybackScheduler::interrupt
//! LiveEvent::Error        → teardown                           [Error]
//! LiveEvent::Closed       → release microphone                 [Closed]
//! Stop / SetLanguage      → teardown                           [Idle]
//! ```
//!
//! The controller holds `!Send` audio handles, so it runs on a
//! `tokio::task::LocalSet` (or directly under `block_on`).  The capture
//! callback runs on the audio thread and only encodes and enqueues.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::codec::{self, Envelope};
use crate::audio::{
    CaptureConfig, CaptureError, CaptureSource, CaptureStream, PlaybackError, PlaybackOutput,
    PlaybackScheduler, UnitId,
};
use crate::config::LiveConfig;
use crate::prompt::live_instruction;
use crate::types::Language;

use super::state::{ConnectionState, LiveUpdate};
use super::transcript::{TranscriptAssembler, TranscriptEntry};
use super::transport::{LiveConnection, LiveConnector, LiveEvent, LiveSetup, TransportError};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Any failure that ends a live session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Commands and internal signals
// ---------------------------------------------------------------------------

/// Requests from the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
    SetLanguage(Language),
}

type PendingConnect = JoinHandle<Result<LiveConnection, TransportError>>;

enum Signal {
    Connected(Result<LiveConnection, TransportError>),
    Event(LiveEvent),
    Finished(UnitId),
}

/// Everything that lives exactly as long as one session.
struct Session {
    capture: Box<dyn CaptureStream>,
    scheduler: PlaybackScheduler,
    finished_rx: mpsc::UnboundedReceiver<UnitId>,
    pending: Option<PendingConnect>,
    connection: Option<LiveConnection>,
}

impl Session {
    fn id(&self) -> &str {
        self.connection
            .as_ref()
            .map(|c| c.session_id.as_str())
            .unwrap_or("pending")
    }
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// Drives the live voice session.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use farmer_assistant::audio::{CpalCaptureSource, CpalPlaybackOutput};
/// use farmer_assistant::config::LiveConfig;
/// use farmer_assistant::live::{GeminiLiveConnector, SessionCommand, SessionController};
/// use farmer_assistant::types::Language;
///
/// # async fn example() {
/// let connector = GeminiLiveConnector::new("wss://…", "API_KEY", Duration::from_secs(15));
/// let controller = SessionController::new(
///     LiveConfig::default(),
///     Language::default(),
///     Box::new(CpalCaptureSource::new(None)),
///     Box::new(CpalPlaybackOutput::new(None)),
///     Arc::new(connector),
/// );
///
/// let (tx, rx) = tokio::sync::mpsc::channel(8);
/// tx.send(SessionCommand::Start).await.unwrap();
/// tokio::task::LocalSet::new().run_until(controller.run(rx)).await;
/// # }
/// ```
pub struct SessionController {
    settings: LiveConfig,
    language: Language,
    capture: Box<dyn CaptureSource>,
    playback: Box<dyn PlaybackOutput>,
    connector: Arc<dyn LiveConnector>,

    state: ConnectionState,
    session: Option<Session>,
    assembler: TranscriptAssembler,
    transcripts: Vec<TranscriptEntry>,
    updates: Option<mpsc::UnboundedSender<LiveUpdate>>,
}

impl SessionController {
    pub fn new(
        mut settings: LiveConfig,
        language: Language,
        capture: Box<dyn CaptureSource>,
        playback: Box<dyn PlaybackOutput>,
        connector: Arc<dyn LiveConnector>,
    ) -> Self {
        for field in settings.sanitize() {
            log::warn!("{field} must be greater than zero, using the default");
        }
        Self {
            settings,
            language,
            capture,
            playback,
            connector,
            state: ConnectionState::Idle,
            session: None,
            assembler: TranscriptAssembler::new(),
            transcripts: Vec::new(),
            updates: None,
        }
    }

    /// Publish state changes and finished transcript entries on `updates`.
    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<LiveUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Run until `commands` is closed, then stop any active session.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                signal = Self::wait_signal(&mut self.session) => {
                    self.handle_signal(signal).await;
                }
            }
        }

        self.stop().await;
        log::info!("live: command channel closed, controller shutting down");
    }

    /// Process one remote/playback signal of the active session.
    ///
    /// Returns `false` immediately when no session exists.
    pub async fn step(&mut self) -> bool {
        if self.session.is_none() {
            return false;
        }
        let signal = Self::wait_signal(&mut self.session).await;
        self.handle_signal(signal).await;
        true
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Start => {
                if let Err(e) = self.start().await {
                    log::warn!("live: start failed: {e}");
                }
            }
            SessionCommand::Stop => self.stop().await,
            SessionCommand::SetLanguage(language) => self.set_language(language).await,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open the microphone and speaker, then begin the remote handshake.
    ///
    /// Any existing session is torn down first.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.session.is_some() {
            self.teardown().await;
        }

        self.set_state(ConnectionState::Connecting);
        self.assembler.clear();
        self.transcripts.clear();

        let mut capture = match self.capture.acquire(CaptureConfig {
            sample_rate: self.settings.input_sample_rate,
            frame_size: self.settings.frame_size,
        }) {
            Ok(capture) => capture,
            Err(e) => return Err(self.fail_without_session(e.into())),
        };

        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let sink = match self.playback.open(self.settings.output_sample_rate, finished_tx) {
            Ok(sink) => sink,
            Err(e) => {
                capture.stop();
                return Err(self.fail_without_session(e.into()));
            }
        };

        let setup = LiveSetup {
            model: self.settings.model.clone(),
            voice_name: self.settings.voice_name.clone(),
            system_instruction: live_instruction(&self.language),
            language: self.language,
        };
        let connector = Arc::clone(&self.connector);
        let pending = tokio::spawn(async move { connector.connect(setup).await });

        self.session = Some(Session {
            capture,
            scheduler: PlaybackScheduler::new(sink),
            finished_rx,
            pending: Some(pending),
            connection: None,
        });

        log::info!("live: connecting in {}", self.language.name);
        Ok(())
    }

    /// End the session and return to idle.  No-op without a session.
    pub async fn stop(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.teardown().await;
        self.set_state(ConnectionState::Idle);
    }

    /// Switch language.  An active session is stopped because its system
    /// instruction is bound at setup time.
    pub async fn set_language(&mut self, language: Language) {
        if language == self.language {
            return;
        }
        if self.state.is_active() {
            log::info!("live: language changed to {}, stopping session", language.name);
            self.stop().await;
        }
        self.language = language;
    }

    /// Release everything owned by the session.  Idempotent.
    ///
    /// A handshake still in flight is awaited and the resulting connection
    /// closed, so no remote session is left dangling.
    async fn teardown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        if let Some(pending) = session.pending.take() {
            match pending.await {
                Ok(Ok(conn)) => {
                    log::debug!("session={} closing connection that finished during teardown", conn.session_id);
                    conn.outbound.close().await;
                }
                Ok(Err(e)) => log::debug!("live: pending handshake failed during teardown: {e}"),
                Err(e) => log::debug!("live: connect task ended abnormally: {e}"),
            }
        }

        if let Some(conn) = session.connection.take() {
            conn.outbound.close().await;
        }

        session.capture.stop();
        session.scheduler.reset();
        self.assembler.clear();
        log::info!("live: session torn down");
    }

    async fn fail(&mut self, err: SessionError) {
        log::error!("live: session failed: {err}");
        self.teardown().await;
        self.set_state(ConnectionState::Error);
    }

    fn fail_without_session(&mut self, err: SessionError) -> SessionError {
        log::error!("live: could not start session: {err}");
        self.set_state(ConnectionState::Error);
        err
    }

    // -----------------------------------------------------------------------
    // Signal handling
    // -----------------------------------------------------------------------

    async fn wait_signal(session: &mut Option<Session>) -> Signal {
        let Some(session) = session.as_mut() else {
            return std::future::pending().await;
        };
        tokio::select! {
            joined = join_pending(&mut session.pending) => Signal::Connected(joined),
            event = recv_event(&mut session.connection) => Signal::Event(event),
            id = recv_finished(&mut session.finished_rx) => Signal::Finished(id),
        }
    }

    async fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Connected(Ok(conn)) => self.on_connected(conn).await,
            Signal::Connected(Err(e)) => self.fail(e.into()).await,
            Signal::Event(event) => self.on_event(event).await,
            Signal::Finished(id) => {
                if let Some(session) = self.session.as_mut() {
                    session.scheduler.complete(id);
                }
            }
        }
    }

    async fn on_connected(&mut self, conn: LiveConnection) {
        let Some(session) = self.session.as_mut() else {
            conn.outbound.close().await;
            return;
        };

        let outbound = conn.outbound.clone();
        let started = session.capture.start(Box::new(move |frame| {
            let chunk = codec::encode(&frame.samples, Envelope::Base64);
            if outbound.send_audio(chunk).is_err() {
                log::trace!("live: outbound frame dropped");
            }
        }));
        log::info!("session={} connected", conn.session_id);
        session.connection = Some(conn);

        match started {
            Ok(()) => self.set_state(ConnectionState::Connected),
            Err(e) => self.fail(e.into()).await,
        }
    }

    async fn on_event(&mut self, event: LiveEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match event {
            LiveEvent::Audio(chunk) => match codec::decode(&chunk, self.settings.output_sample_rate) {
                Ok(audio) => {
                    session.scheduler.enqueue(audio);
                }
                Err(e) => log::warn!("session={} dropping audio payload: {e}", session.id()),
            },
            LiveEvent::InputTranscription(text) => self.assembler.append_input(&text),
            LiveEvent::OutputTranscription(text) => self.assembler.append_output(&text),
            LiveEvent::TurnComplete => {
                for entry in self.assembler.complete_turn().entries() {
                    log::debug!("live: {}: {}", entry.speaker.label(), entry.text);
                    self.publish(LiveUpdate::Transcript(entry.clone()));
                    self.transcripts.push(entry);
                }
            }
            LiveEvent::Interrupted => {
                log::debug!("session={} interrupted by user speech", session.id());
                session.scheduler.interrupt();
            }
            LiveEvent::Error(message) => self.fail(TransportError::Protocol(message).into()).await,
            LiveEvent::Closed => self.on_remote_closed(),
        }
    }

    fn on_remote_closed(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        log::info!("session={} closed by remote", session.id());
        session.capture.stop();
        session.scheduler.reset();
        self.assembler.clear();
        self.set_state(ConnectionState::Closed);
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn set_state(&mut self, state: ConnectionState) {
        log::debug!("live: {} → {}", self.state.label(), state.label());
        self.state = state;
        self.publish(LiveUpdate::State(state));
    }

    fn publish(&self, update: LiveUpdate) {
        if let Some(tx) = &self.updates {
            // Front-end gone; nothing left to render.
            let _ = tx.send(update);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Finalized transcript of the current (or last) session.
    pub fn transcripts(&self) -> &[TranscriptEntry] {
        &self.transcripts
    }

    /// Playback units still scheduled or sounding.
    pub fn active_playback_units(&self) -> usize {
        self.session
            .as_ref()
            .map(|s| s.scheduler.active_len())
            .unwrap_or(0)
    }
}

async fn join_pending(pending: &mut Option<PendingConnect>) -> Result<LiveConnection, TransportError> {
    let Some(handle) = pending.as_mut() else {
        return std::future::pending().await;
    };
    let joined = handle.await;
    *pending = None;
    joined.unwrap_or_else(|e| Err(TransportError::Connect(format!("connect task failed: {e}"))))
}

async fn recv_event(connection: &mut Option<LiveConnection>) -> LiveEvent {
    match connection.as_mut() {
        // A dropped sender means the transport is gone.
        Some(conn) => conn.events.recv().await.unwrap_or(LiveEvent::Closed),
        None => std::future::pending().await,
    }
}

async fn recv_finished(rx: &mut mpsc::UnboundedReceiver<UnitId>) -> UnitId {
    match rx.recv().await {
        Some(id) => id,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
