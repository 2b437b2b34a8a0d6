//! [`SpeechBackend`] that runs an external synthesizer per utterance.
//!
//! The command line comes from [`SpeechConfig`]; `{text}`, `{lang}` and
//! `{voice}` in the arguments are replaced per utterance.  The child runs on
//! the current tokio runtime and is killed on cancel.

use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use tokio::process::Command;
use tokio::sync::oneshot;

use crate::config::SpeechConfig;

use super::{SpeechBackend, SpeechCallback, SpeechError, SpeechEvent, Utterance};

pub struct CommandSpeech {
    command: String,
    args: Vec<String>,
    /// Kill switch of the most recent child.
    current: Mutex<Option<oneshot::Sender<()>>>,
}

impl CommandSpeech {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            current: Mutex::new(None),
        }
    }

    pub fn from_config(config: &SpeechConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }

    fn render_args(&self, utterance: &Utterance) -> Vec<String> {
        let voice = utterance.language.voice_hint();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{text}", &utterance.text)
                    .replace("{lang}", utterance.language.code)
                    .replace("{voice}", &voice)
            })
            .collect()
    }

    fn kill_current(&self) {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(kill) = previous {
            // The child may already have exited.
            let _ = kill.send(());
        }
    }
}

impl SpeechBackend for CommandSpeech {
    fn speak(&self, utterance: Utterance, on_event: SpeechCallback) -> Result<(), SpeechError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SpeechError::Unavailable(e.to_string()))?;
        let _enter = runtime.enter();

        self.kill_current();

        let mut child = Command::new(&self.command)
            .args(self.render_args(&utterance))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpeechError::Unavailable(format!("{}: {e}", self.command)))?;

        let (kill_tx, kill_rx) = oneshot::channel();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(kill_tx);

        on_event(SpeechEvent::Started);
        let command = self.command.clone();
        runtime.spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => on_event(SpeechEvent::Ended),
                    Ok(status) => {
                        log::warn!("speech: {command} exited with {status}");
                        on_event(SpeechEvent::Failed);
                    }
                    Err(e) => {
                        log::warn!("speech: waiting for {command} failed: {e}");
                        on_event(SpeechEvent::Failed);
                    }
                },
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        log::debug!("speech: kill {command}: {e}");
                    }
                    on_event(SpeechEvent::Ended);
                }
            }
        });
        Ok(())
    }

    fn cancel(&self) {
        self.kill_current();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
