//! Live-session state machine and the updates published to the front-end.
//!
//! [`ConnectionState`] is owned by the
//! [`SessionController`](super::controller::SessionController); the UI only
//! ever sees copies delivered as [`LiveUpdate`]s.

use crate::types::Language;

use super::transcript::TranscriptEntry;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// States of the live voice session.
///
/// The state machine transitions are:
///
/// ```text
/// Idle ──start──▶ Connecting ──remote ack──▶ Connected
///                     │                          │
///                     │                          ├──remote close──▶ Closed
///                     ├──────transport error─────┴────────────────▶ Error
///                     └─────────────stop / language change────────▶ Idle
/// Closed / Error ──start──▶ Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session.  Waiting for the user to start one.
    #[default]
    Idle,

    /// Microphone and speaker are open; the remote handshake is in flight.
    Connecting,

    /// Audio is streaming in both directions.
    Connected,

    /// The remote side ended the session.
    Closed,

    /// The session failed and was torn down.
    Error,
}

impl ConnectionState {
    /// Returns `true` while a session exists.
    ///
    /// ```
    /// use farmer_assistant::live::ConnectionState;
    ///
    /// assert!(!ConnectionState::Idle.is_active());
    /// assert!(ConnectionState::Connecting.is_active());
    /// assert!(ConnectionState::Connected.is_active());
    /// assert!(!ConnectionState::Closed.is_active());
    /// assert!(!ConnectionState::Error.is_active());
    /// ```
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
            ConnectionState::Error => "error",
        }
    }

    /// User-facing status line.  Never carries raw error details.
    pub fn status_text(&self, language: &Language) -> String {
        match self {
            ConnectionState::Idle => format!(
                "Click start to begin a live conversation in {}.",
                language.name
            ),
            ConnectionState::Connecting => "Connecting to the live session... Please wait.".into(),
            ConnectionState::Connected => "Connected. Start speaking now.".into(),
            ConnectionState::Error => "An error occurred. Please try again.".into(),
            ConnectionState::Closed => "Session closed.".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// LiveUpdate
// ---------------------------------------------------------------------------

/// Something the front-end should render.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveUpdate {
    State(ConnectionState),
    Transcript(TranscriptEntry),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
