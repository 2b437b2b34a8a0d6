//! Test doubles shared by the unit tests.
//!
//! * [`MockCapture`]: microphone whose frames are pushed by the test.
//! * [`ManualPlayback`]: output device with a hand-driven clock.
//! * [`MockConnector`] / [`MockRemote`]: scripted live service.
//! * [`ScriptedChat`]: chat backend replying from a queue.
//! * [`ScriptedTranscriber`]: dictation backend replying from a queue.
//! * [`RecordingSpeech`]: speech backend that records utterances.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::audio::{
    AudioFrame, CaptureConfig, CaptureError, CaptureSource, CaptureStream, DecodedAudio,
    FrameCallback, PlaybackError, PlaybackOutput, PlaybackSink, UnitId,
};
use crate::chat::{ChatBackend, ChatError, Content, TextStream};
use crate::dictation::{DictationError, Recording, Transcriber};
use crate::live::{LiveConnection, LiveConnector, LiveEvent, LiveSetup, OutboundMessage, OutboundSender, TransportError};
use crate::speech::{SpeechBackend, SpeechCallback, SpeechError, SpeechEvent, Utterance};
use crate::types::Language;

// ---------------------------------------------------------------------------
// MockCapture
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CaptureInner {
    deny: bool,
    callback: Option<FrameCallback>,
    streaming: bool,
    released: bool,
}

/// Microphone double.  Every acquired stream shares the same state, so the
/// test can observe the latest stream through any clone.
#[derive(Clone, Default)]
pub struct MockCapture {
    inner: Arc<Mutex<CaptureInner>>,
}

impl MockCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// A microphone that refuses access.
    pub fn denying() -> Self {
        let mock = Self::default();
        mock.inner.lock().unwrap().deny = true;
        mock
    }

    /// Deliver one frame.  Returns `false` when no callback is attached.
    pub fn emit(&self, samples: &[f32]) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.callback.as_mut() {
            Some(callback) => {
                callback(AudioFrame {
                    samples: samples.to_vec(),
                    sample_rate: 16_000,
                });
                true
            }
            None => false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.lock().unwrap().streaming
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().unwrap().released
    }
}

impl CaptureSource for MockCapture {
    fn acquire(&self, config: CaptureConfig) -> Result<Box<dyn CaptureStream>, CaptureError> {
        config.validate()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.deny {
            return Err(CaptureError::PermissionDenied);
        }
        inner.released = false;
        inner.streaming = false;
        inner.callback = None;
        Ok(Box::new(MockCaptureStream {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockCaptureStream {
    inner: Arc<Mutex<CaptureInner>>,
}

impl CaptureStream for MockCaptureStream {
    fn start(&mut self, on_frame: FrameCallback) -> Result<(), CaptureError> {
        let mut inner = self.inner.lock().unwrap();
        inner.callback = Some(on_frame);
        inner.streaming = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.callback = None;
        inner.streaming = false;
        inner.released = true;
    }

    fn is_released(&self) -> bool {
        self.inner.lock().unwrap().released
    }
}

// ---------------------------------------------------------------------------
// ManualPlayback
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PlaybackInner {
    now: f64,
    scheduled: Vec<(UnitId, f64, f64)>,
    cancelled: Vec<UnitId>,
    finished: Option<mpsc::UnboundedSender<UnitId>>,
}

/// Output device whose clock only moves when the test says so.
#[derive(Clone, Default)]
pub struct ManualPlayback {
    inner: Arc<Mutex<PlaybackInner>>,
}

impl ManualPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink on this device without going through [`PlaybackOutput::open`].
    pub fn sink(&self) -> Box<dyn PlaybackSink> {
        Box::new(ManualSink {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn set_now(&self, seconds: f64) {
        self.inner.lock().unwrap().now = seconds;
    }

    /// `(id, start_at, duration)` of every scheduled unit, in order.
    pub fn scheduled(&self) -> Vec<(UnitId, f64, f64)> {
        self.inner.lock().unwrap().scheduled.clone()
    }

    pub fn cancelled(&self) -> Vec<UnitId> {
        self.inner.lock().unwrap().cancelled.clone()
    }

    /// Report the natural end of unit `id`.
    pub fn finish(&self, id: UnitId) {
        if let Some(tx) = &self.inner.lock().unwrap().finished {
            let _ = tx.send(id);
        }
    }
}

impl PlaybackOutput for ManualPlayback {
    fn open(
        &self,
        _sample_rate: u32,
        finished: mpsc::UnboundedSender<UnitId>,
    ) -> Result<Box<dyn PlaybackSink>, PlaybackError> {
        self.inner.lock().unwrap().finished = Some(finished);
        Ok(self.sink())
    }
}

struct ManualSink {
    inner: Arc<Mutex<PlaybackInner>>,
}

impl PlaybackSink for ManualSink {
    fn current_time(&self) -> f64 {
        self.inner.lock().unwrap().now
    }

    fn schedule(&mut self, id: UnitId, audio: &DecodedAudio, start_at: f64) {
        self.inner
            .lock()
            .unwrap()
            .scheduled
            .push((id, start_at, audio.duration()));
    }

    fn cancel(&mut self, id: UnitId) {
        self.inner.lock().unwrap().cancelled.push(id);
    }
}

// ---------------------------------------------------------------------------
// MockConnector
// ---------------------------------------------------------------------------

/// The service side of one mock connection.
pub struct MockRemote {
    pub setup: LiveSetup,
    pub outbound: mpsc::Receiver<OutboundMessage>,
    pub events: mpsc::Sender<LiveEvent>,
}

#[derive(Default)]
struct ConnectorInner {
    fail_with: Option<TransportError>,
    gate: Option<oneshot::Receiver<()>>,
    connects: usize,
    remotes: VecDeque<MockRemote>,
}

/// Live service double.  Each successful connect queues a [`MockRemote`].
#[derive(Clone, Default)]
pub struct MockConnector {
    inner: Arc<Mutex<ConnectorInner>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every handshake fails with `err`.
    pub fn failing(err: TransportError) -> Self {
        let mock = Self::default();
        mock.inner.lock().unwrap().fail_with = Some(err);
        mock
    }

    /// The next connect waits until the returned sender fires (or drops).
    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().gate = Some(rx);
        tx
    }

    pub fn connect_count(&self) -> usize {
        self.inner.lock().unwrap().connects
    }

    /// Oldest connection not yet taken.
    pub fn take_remote(&self) -> Option<MockRemote> {
        self.inner.lock().unwrap().remotes.pop_front()
    }
}

#[async_trait]
impl LiveConnector for MockConnector {
    async fn connect(&self, setup: LiveSetup) -> Result<LiveConnection, TransportError> {
        let gate = {
            let mut inner = self.inner.lock().unwrap();
            inner.connects += 1;
            inner.gate.take()
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.fail_with.clone() {
            return Err(err);
        }

        let (out_tx, out_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        inner.remotes.push_back(MockRemote {
            setup,
            outbound: out_rx,
            events: event_tx,
        });
        Ok(LiveConnection {
            session_id: Uuid::new_v4().to_string(),
            outbound: OutboundSender::new(out_tx),
            events: event_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedChat
// ---------------------------------------------------------------------------

enum Reply {
    Chunks(Vec<Result<String, ChatError>>),
    Refuse(ChatError),
}

#[derive(Default)]
struct ChatInner {
    replies: VecDeque<Reply>,
    requests: Vec<(String, Vec<Content>)>,
}

/// Chat backend that answers each request with the next scripted reply.
#[derive(Clone, Default)]
pub struct ScriptedChat {
    inner: Arc<Mutex<ChatInner>>,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, chunks: &[&str]) {
        let chunks = chunks.iter().map(|c| Ok(c.to_string())).collect();
        self.inner.lock().unwrap().replies.push_back(Reply::Chunks(chunks));
    }

    /// Stream `chunks`, then fail with `err`.
    pub fn reply_then_fail(&self, chunks: &[&str], err: ChatError) {
        let mut items: Vec<_> = chunks.iter().map(|c| Ok(c.to_string())).collect();
        items.push(Err(err));
        self.inner.lock().unwrap().replies.push_back(Reply::Chunks(items));
    }

    /// Reject the request before any stream opens.
    pub fn refuse(&self, err: ChatError) {
        self.inner.lock().unwrap().replies.push_back(Reply::Refuse(err));
    }

    /// `(system_instruction, contents)` of every request, in order.
    pub fn requests(&self) -> Vec<(String, Vec<Content>)> {
        self.inner.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn stream_reply(
        &self,
        system_instruction: &str,
        contents: Vec<Content>,
    ) -> Result<TextStream, ChatError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .requests
            .push((system_instruction.to_string(), contents));
        match inner.replies.pop_front() {
            Some(Reply::Chunks(items)) => Ok(stream::iter(items).boxed()),
            Some(Reply::Refuse(err)) => Err(err),
            None => Err(ChatError::Request("no scripted reply".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedTranscriber
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TranscriberInner {
    replies: VecDeque<Result<String, DictationError>>,
    clips: Vec<(usize, Language)>,
}

/// Transcriber that answers each clip with the next scripted reply, or an
/// empty transcript once the queue runs dry.
#[derive(Clone, Default)]
pub struct ScriptedTranscriber {
    inner: Arc<Mutex<TranscriberInner>>,
}

impl ScriptedTranscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, text: &str) {
        self.inner.lock().unwrap().replies.push_back(Ok(text.to_string()));
    }

    pub fn refuse(&self, err: DictationError) {
        self.inner.lock().unwrap().replies.push_back(Err(err));
    }

    /// `(sample count, language)` of every clip received, in order.
    pub fn clips(&self) -> Vec<(usize, Language)> {
        self.inner.lock().unwrap().clips.clone()
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, clip: Recording, language: Language) -> Result<String, DictationError> {
        let mut inner = self.inner.lock().unwrap();
        inner.clips.push((clip.samples.len(), language));
        inner.replies.pop_front().unwrap_or_else(|| Ok(String::new()))
    }
}

// ---------------------------------------------------------------------------
// RecordingSpeech
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SpeechInner {
    fail: bool,
    spoken: Vec<(String, &'static str)>,
    callbacks: Vec<SpeechCallback>,
    cancels: usize,
}

/// Speech backend that reports `Started` immediately and lets the test
/// deliver later events.
#[derive(Clone, Default)]
pub struct RecordingSpeech {
    inner: Arc<Mutex<SpeechInner>>,
}

impl RecordingSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let mock = Self::default();
        mock.inner.lock().unwrap().fail = true;
        mock
    }

    /// `(text, language code)` of every utterance.
    pub fn spoken(&self) -> Vec<(String, &'static str)> {
        self.inner.lock().unwrap().spoken.clone()
    }

    pub fn cancels(&self) -> usize {
        self.inner.lock().unwrap().cancels
    }

    /// Deliver `event` to the callback of utterance number `index`.
    pub fn emit(&self, index: usize, event: SpeechEvent) {
        let inner = self.inner.lock().unwrap();
        (inner.callbacks[index])(event);
    }
}

impl SpeechBackend for RecordingSpeech {
    fn speak(&self, utterance: Utterance, on_event: SpeechCallback) -> Result<(), SpeechError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail {
                return Err(SpeechError::Unavailable("no synthesizer".into()));
            }
            inner.spoken.push((utterance.text, utterance.language.code));
        }
        on_event(SpeechEvent::Started);
        self.inner.lock().unwrap().callbacks.push(on_event);
        Ok(())
    }

    fn cancel(&self) {
        self.inner.lock().unwrap().cancels += 1;
    }
}
