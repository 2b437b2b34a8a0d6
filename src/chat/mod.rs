//! Turn-based text/image chat against a streaming language model.
//!
//! This module provides:
//! * [`ChatStreamController`]: owns the history and drives streamed turns.
//! * [`ChatBackend`]: async trait implemented by reply backends.
//! * [`GeminiChatBackend`]: `streamGenerateContent` over server-sent events.
//! * [`ChatMessage`] / [`ChatInput`] / [`ImageAttachment`]: history and input.
//! * [`ChatError`]: error variants for chat operations.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use farmer_assistant::chat::{ChatInput, ChatStreamController, GeminiChatBackend, TurnEvent};
//! use farmer_assistant::config::AppConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let backend = GeminiChatBackend::from_config(&config.api, &config.chat, "API_KEY");
//!     let mut chat = ChatStreamController::new(Arc::new(backend), config.language());
//!
//!     chat.send(ChatInput::text("How do I treat leaf blight?"), |event| {
//!         if let TurnEvent::Delta(text) = event {
//!             print!("{text}");
//!         }
//!     })
//!     .await
//!     .unwrap();
//! }
//! ```

pub mod backend;
pub mod controller;
pub mod message;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use backend::{ChatBackend, ChatError, Content, GeminiChatBackend, Part, SseDecoder, TextStream};
pub use controller::{ChatStreamController, ChatTurn, TurnEvent};
pub use message::{ChatInput, ChatMessage, ImageAttachment};
