//! Bidirectional live-audio transport.
//!
//! [`LiveConnector`] is the seam between the session controller and the
//! network.  A successful [`connect`](LiveConnector::connect) resolves once
//! the remote side has acknowledged the session setup, and yields a
//! [`LiveConnection`]: an [`OutboundSender`] for realtime audio plus a
//! channel of inbound [`LiveEvent`]s.  The channel ends with
//! [`LiveEvent::Closed`] when the remote side goes away.
//!
//! [`GeminiLiveConnector`] implements the seam over a WebSocket with
//! `tokio-tungstenite`.  After the handshake the socket is split into two
//! tasks:
//!
//! ```text
//! OutboundSender ──mpsc──▶ outbound_loop ──▶ ws sink
//! ws stream ──▶ inbound_loop ──parse──▶ mpsc ──▶ LiveConnection::events
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::audio::EncodedAudioChunk;
use crate::types::Language;

use super::protocol::{build_audio_message, build_setup_message, parse_server_message, ServerEvent};

/// Capacity of the outbound audio queue.  Frames beyond it are dropped.
const OUTBOUND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The live transport failed.  Always fatal for the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("could not connect to the live service: {0}")]
    Connect(String),

    #[error("live session setup was rejected: {0}")]
    Handshake(String),

    #[error("live session setup timed out after {0:?}")]
    Timeout(Duration),

    #[error("live connection closed")]
    Closed,

    #[error("live protocol error: {0}")]
    Protocol(String),
}

/// An outbound frame was discarded because the transport was not ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("outbound audio frame dropped")]
pub struct SendDropped;

// ---------------------------------------------------------------------------
// Events and handles
// ---------------------------------------------------------------------------

/// Inbound facts delivered to the session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// 24 kHz PCM16 speech.
    Audio(EncodedAudioChunk),
    InputTranscription(String),
    OutputTranscription(String),
    TurnComplete,
    Interrupted,
    Error(String),
    Closed,
}

impl LiveEvent {
    fn from_server(event: ServerEvent) -> Option<Self> {
        Some(match event {
            ServerEvent::SetupComplete => return None,
            ServerEvent::Audio(b64) => LiveEvent::Audio(EncodedAudioChunk::Base64(b64)),
            ServerEvent::InputTranscription(text) => LiveEvent::InputTranscription(text),
            ServerEvent::OutputTranscription(text) => LiveEvent::OutputTranscription(text),
            ServerEvent::TurnComplete => LiveEvent::TurnComplete,
            ServerEvent::Interrupted => LiveEvent::Interrupted,
            ServerEvent::Error(message) => LiveEvent::Error(message),
        })
    }
}

/// Per-session options bound at setup time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSetup {
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
    pub language: Language,
}

/// Messages consumed by the outbound half of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Audio(EncodedAudioChunk),
    Close,
}

/// Cheap, cloneable handle for sending to one connection.
///
/// Safe to call from the audio thread: [`send_audio`](Self::send_audio)
/// never blocks.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<OutboundMessage>,
}

impl OutboundSender {
    pub fn new(tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self { tx }
    }

    /// Queue one frame.  A full or closed queue drops it.
    pub fn send_audio(&self, chunk: EncodedAudioChunk) -> Result<(), SendDropped> {
        self.tx
            .try_send(OutboundMessage::Audio(chunk))
            .map_err(|_| SendDropped)
    }

    /// Ask the transport to close the connection.  Idempotent.
    pub async fn close(&self) {
        // A closed queue means the connection is already gone.
        let _ = self.tx.send(OutboundMessage::Close).await;
    }
}

/// An established live session.
#[derive(Debug)]
pub struct LiveConnection {
    pub session_id: String,
    pub outbound: OutboundSender,
    pub events: mpsc::Receiver<LiveEvent>,
}

// ---------------------------------------------------------------------------
// LiveConnector
// ---------------------------------------------------------------------------

/// Opens live sessions.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Connect and complete the session handshake.
    async fn connect(&self, setup: LiveSetup) -> Result<LiveConnection, TransportError>;
}

// ---------------------------------------------------------------------------
// GeminiLiveConnector
// ---------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Gemini Live over WebSocket.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use farmer_assistant::live::{GeminiLiveConnector, LiveConnector, LiveSetup};
/// use farmer_assistant::types::Language;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = GeminiLiveConnector::new(
///     "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent",
///     "API_KEY",
///     Duration::from_secs(15),
/// );
/// let mut conn = connector
///     .connect(LiveSetup {
///         model: "gemini-2.5-flash-native-audio-preview-09-2025".into(),
///         voice_name: "Zephyr".into(),
///         system_instruction: "Respond ONLY in English.".into(),
///         language: Language::default(),
///     })
///     .await?;
/// while let Some(event) = conn.events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct GeminiLiveConnector {
    url: String,
    api_key: String,
    setup_timeout: Duration,
}

impl GeminiLiveConnector {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, setup_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            setup_timeout,
        }
    }

    /// Open the socket, send the setup message and wait for the service to
    /// acknowledge it.
    async fn handshake(&self, setup: &LiveSetup, session_id: &str) -> Result<WsStream, TransportError> {
        let url = format!("{}?key={}", self.url, self.api_key);
        let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let setup_msg = build_setup_message(&setup.model, &setup.voice_name, &setup.system_instruction);
        let setup_json =
            serde_json::to_string(&setup_msg).map_err(|e| TransportError::Protocol(e.to_string()))?;
        ws.send(WsMessage::Text(setup_json.into()))
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        Self::await_setup_complete(&mut ws, session_id).await?;
        Ok(ws)
    }

    async fn await_setup_complete(ws: &mut WsStream, session_id: &str) -> Result<(), TransportError> {
        while let Some(frame) = ws.next().await {
            let text = match frame {
                Ok(WsMessage::Text(text)) => text.to_string(),
                Ok(WsMessage::Binary(data)) if data.first() == Some(&b'{') => {
                    String::from_utf8_lossy(&data).into_owned()
                }
                Ok(WsMessage::Close(frame)) => {
                    log::warn!("session={session_id} closed before setup: {frame:?}");
                    return Err(TransportError::Closed);
                }
                Ok(other) => {
                    log::debug!("session={session_id} ignoring frame during setup: {other:?}");
                    continue;
                }
                Err(e) => return Err(TransportError::Handshake(e.to_string())),
            };

            for event in parse_server_message(&text) {
                match event {
                    ServerEvent::SetupComplete => return Ok(()),
                    ServerEvent::Error(message) => return Err(TransportError::Handshake(message)),
                    _ => {}
                }
            }
        }
        Err(TransportError::Closed)
    }

    async fn outbound_loop(
        mut rx: mpsc::Receiver<OutboundMessage>,
        mut sink: SplitSink<WsStream, WsMessage>,
        session_id: String,
    ) {
        let mut frames: u64 = 0;

        while let Some(msg) = rx.recv().await {
            match msg {
                OutboundMessage::Audio(chunk) => {
                    let json = match serde_json::to_string(&build_audio_message(chunk.to_base64())) {
                        Ok(json) => json,
                        Err(e) => {
                            log::error!("session={session_id} failed to serialize audio: {e}");
                            continue;
                        }
                    };
                    frames += 1;
                    if frames == 1 || frames % 100 == 0 {
                        log::debug!("session={session_id} sent {frames} audio frame(s)");
                    }
                    if sink.send(WsMessage::Text(json.into())).await.is_err() {
                        log::warn!("session={session_id} websocket send failed, stopping outbound loop");
                        break;
                    }
                }
                OutboundMessage::Close => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    log::info!("session={session_id} close requested");
                    break;
                }
            }
        }

        let _ = sink.close().await;
        log::debug!("session={session_id} outbound loop terminated");
    }

    async fn inbound_loop(
        mut stream: SplitStream<WsStream>,
        tx: mpsc::Sender<LiveEvent>,
        session_id: String,
    ) {
        while let Some(frame) = stream.next().await {
            let events: Vec<LiveEvent> = match frame {
                Ok(WsMessage::Text(text)) => Self::translate(&text),
                Ok(WsMessage::Binary(data)) if data.first() == Some(&b'{') => {
                    Self::translate(&String::from_utf8_lossy(&data))
                }
                // Non-JSON binary frames carry raw PCM.
                Ok(WsMessage::Binary(data)) if !data.is_empty() => {
                    vec![LiveEvent::Audio(EncodedAudioChunk::Binary(data.to_vec()))]
                }
                Ok(WsMessage::Close(frame)) => {
                    log::info!("session={session_id} closed by remote: {frame:?}");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    log::error!("session={session_id} websocket error: {e}");
                    let _ = tx.send(LiveEvent::Error(e.to_string())).await;
                    return;
                }
            };

            for event in events {
                if tx.send(event).await.is_err() {
                    log::debug!("session={session_id} event receiver dropped");
                    return;
                }
            }
        }

        let _ = tx.send(LiveEvent::Closed).await;
        log::debug!("session={session_id} inbound loop terminated");
    }

    fn translate(text: &str) -> Vec<LiveEvent> {
        parse_server_message(text)
            .into_iter()
            .filter_map(LiveEvent::from_server)
            .collect()
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, setup: LiveSetup) -> Result<LiveConnection, TransportError> {
        let session_id = Uuid::new_v4().to_string();
        log::info!(
            "session={session_id} connecting (model {}, voice {}, language {})",
            setup.model,
            setup.voice_name,
            setup.language.code
        );

        // The deadline covers TCP, TLS and the upgrade as well as the setup
        // acknowledgement.
        let ws = match tokio::time::timeout(self.setup_timeout, self.handshake(&setup, &session_id)).await {
            Ok(Ok(ws)) => {
                log::info!("session={session_id} setup complete");
                ws
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                log::warn!("session={session_id} no setup acknowledgement within {:?}", self.setup_timeout);
                return Err(TransportError::Timeout(self.setup_timeout));
            }
        };

        let (sink, stream) = ws.split();
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

        tokio::spawn(Self::outbound_loop(out_rx, sink, session_id.clone()));
        tokio::spawn(Self::inbound_loop(stream, event_tx, session_id.clone()));

        Ok(LiveConnection {
            session_id,
            outbound: OutboundSender::new(out_tx),
            events: event_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
