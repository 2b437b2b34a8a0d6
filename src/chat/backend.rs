//! Core `ChatBackend` trait and `GeminiChatBackend` implementation.
//!
//! `GeminiChatBackend` calls the `streamGenerateContent` REST endpoint with
//! `alt=sse` and turns the server-sent events into a stream of text
//! increments.  All connection details come from [`ApiConfig`] and
//! [`ChatConfig`].

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{ApiConfig, ChatConfig};

// ---------------------------------------------------------------------------
// ChatError
// ---------------------------------------------------------------------------

/// Errors that can occur while sending a chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// A reply is still streaming; the new turn was rejected.
    #[error("a reply is still streaming")]
    Busy,

    /// The image could not be read or has an unsupported type.
    #[error("image attachment rejected: {0}")]
    Attachment(String),

    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("chat request timed out")]
    Timeout,

    /// The service answered with a non-success status.
    #[error("chat service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// An event in the reply stream could not be parsed.
    #[error("failed to parse chat reply: {0}")]
    Parse(String),

    /// The service reported an error in the middle of the stream.
    #[error("chat stream failed: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChatError::Timeout
        } else {
            ChatError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Wire content
// ---------------------------------------------------------------------------

/// One turn of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: "user".into(),
            parts,
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: "model".into(),
            parts: vec![Part::text(text)],
        }
    }
}

/// Serializes as `{"text": …}` or `{"inlineData": {"mimeType": …, "data": …}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    InlineData(InlineData),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }

    pub fn inline_data(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Part::InlineData(InlineData {
            mime_type: mime_type.into(),
            data: data.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: SystemInstruction,
    contents: &'a [Content],
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

// ---------------------------------------------------------------------------
// ChatBackend trait
// ---------------------------------------------------------------------------

/// A finite, lazy stream of reply text increments.
pub type TextStream = BoxStream<'static, Result<String, ChatError>>;

/// Async trait for streaming chat replies.
///
/// Implementors must be `Send + Sync` so they can be shared as
/// `Arc<dyn ChatBackend>`.
///
/// # Arguments
/// * `system_instruction` – Fixed for the lifetime of a chat session.
/// * `contents`           – Full history, ending with the new user turn.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_reply(
        &self,
        system_instruction: &str,
        contents: Vec<Content>,
    ) -> Result<TextStream, ChatError>;
}

// ---------------------------------------------------------------------------
// GeminiChatBackend
// ---------------------------------------------------------------------------

/// Calls `{base_url}/v1beta/models/{model}:streamGenerateContent?alt=sse`.
pub struct GeminiChatBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiChatBackend {
    /// Build a backend from application config.
    ///
    /// The timeout bounds connecting and the arrival of the response head;
    /// the body is read for as long as the service keeps streaming.
    pub fn from_config(api: &ApiConfig, chat: &ChatConfig, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(chat.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: chat.model.clone(),
        }
    }

    fn endpoint(&self) -> String {
        let model = self.model.strip_prefix("models/").unwrap_or(&self.model);
        format!(
            "{}/v1beta/models/{model}:streamGenerateContent?alt=sse",
            self.base_url
        )
    }
}

#[async_trait]
impl ChatBackend for GeminiChatBackend {
    async fn stream_reply(
        &self,
        system_instruction: &str,
        contents: Vec<Content>,
    ) -> Result<TextStream, ChatError> {
        let body = GenerateRequest {
            system_instruction: SystemInstruction {
                parts: vec![Part::text(system_instruction)],
            },
            contents: &contents,
        };

        log::debug!("chat: requesting reply ({} turn(s)) from {}", contents.len(), self.model);
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(sse_text_stream(response.bytes_stream().boxed()))
    }
}

// ---------------------------------------------------------------------------
// Server-sent events
// ---------------------------------------------------------------------------

/// Incremental `text/event-stream` parser.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks are decoded intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the `data` payloads of every completed event.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.take_line(&line[..newline], &mut events);
        }
        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.take_line(&line, &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn take_line(&mut self, line: &[u8], events: &mut Vec<String>) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        let line = String::from_utf8_lossy(line);
        if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        // Comments and other fields (event, id, retry) carry nothing we use.
    }

    fn dispatch(&mut self, events: &mut Vec<String>) {
        if !self.data.is_empty() {
            events.push(self.data.join("\n"));
            self.data.clear();
        }
    }
}

/// Text carried by one `GenerateContentResponse` event, if any.
pub fn parse_event(data: &str) -> Result<Option<String>, ChatError> {
    let value: Value = serde_json::from_str(data).map_err(|e| ChatError::Parse(e.to_string()))?;

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(ChatError::Stream(message.to_string()));
    }

    let text: String = value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    Ok((!text.is_empty()).then_some(text))
}

struct SseState<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, ChatError>>,
    finished: bool,
}

impl<S> SseState<S> {
    fn queue(&mut self, payloads: Vec<String>) {
        for data in payloads {
            match parse_event(&data) {
                Ok(Some(text)) => self.pending.push_back(Ok(text)),
                Ok(None) => {}
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// Turn a response body into text increments.  The stream ends after the
/// first error.
fn sse_text_stream<S, B>(body: S) -> TextStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send,
{
    let state = SseState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let payloads = st.decoder.push(chunk.as_ref());
                    st.queue(payloads);
                }
                Some(Err(e)) => {
                    st.pending.push_back(Err(e.into()));
                    st.finished = true;
                }
                None => {
                    let payloads = st.decoder.finish();
                    st.queue(payloads);
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
