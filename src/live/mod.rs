//! Live voice conversation: real-time audio session against a bidirectional
//! speech service.
//!
//! # Architecture
//!
//! ```text
//! SessionCommand (mpsc)
//!        │
//!        ▼
//! SessionController::run()  ← single task, owns all session state
//!        │
//!        ├─ CaptureStream ──AudioFrame──▶ codec::encode ──▶ OutboundSender
//!        │
//!        ├─ LiveConnection::events
//!        │     ├─ Audio            → codec::decode → PlaybackScheduler
//!        │     ├─ *Transcription   → TranscriptAssembler
//!        │     └─ TurnComplete / Interrupted / Error / Closed
//!        │
//!        └─ LiveUpdate (mpsc) ──▶ front-end
//! ```

pub mod controller;
pub mod protocol;
pub mod state;
pub mod transcript;
pub mod transport;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use controller::{SessionCommand, SessionController, SessionError};
pub use state::{ConnectionState, LiveUpdate};
pub use transcript::{CompletedTurn, TranscriptAssembler, TranscriptEntry};
pub use transport::{
    GeminiLiveConnector, LiveConnection, LiveConnector, LiveEvent, LiveSetup, OutboundMessage,
    OutboundSender, SendDropped, TransportError,
};
