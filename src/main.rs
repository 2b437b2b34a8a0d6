//! Application entry point: Farmer Assistant.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Resolve the API key (settings, then `GEMINI_API_KEY` / `API_KEY`).
//! 4. Create the [`tokio`] runtime (multi-thread, 2 workers) and a
//!    `LocalSet` for the live session controller, which owns `!Send`
//!    audio handles.
//! 5. Build speech, chat, dictation and live components from config.
//! 6. Spawn the live session controller.
//! 7. Run the terminal front-end on stdin until `/quit`, Ctrl-C or EOF.
//! 8. Close the live command channel and wait for the controller to stop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use farmer_assistant::{
    app::TerminalApp,
    audio::{CpalCaptureSource, CpalPlaybackOutput},
    chat::{ChatStreamController, GeminiChatBackend},
    config::{AppConfig, AppPaths},
    dictation::{Dictation, DictationRecorder, GeminiTranscriber},
    live::{GeminiLiveConnector, SessionController},
    speech::{CommandSpeech, SpeechController},
};
use tokio::io::BufReader;
use tokio::sync::mpsc;

async fn run(config: AppConfig, api_key: String) -> anyhow::Result<()> {
    let language = config.language();

    // Speech synthesis for chat replies
    let speech = config.speech.enabled.then(|| {
        log::info!("Speech output via {}", config.speech.command);
        SpeechController::new(Arc::new(CommandSpeech::from_config(&config.speech)))
    });

    // Chat
    let backend = GeminiChatBackend::from_config(&config.api, &config.chat, api_key.clone());
    let mut chat = ChatStreamController::new(Arc::new(backend), language);
    if let Some(speech) = &speech {
        chat = chat.with_speech(speech.clone());
    }

    // Dictation into the chat input
    let dictation = config.dictation.enabled.then(|| {
        let transcriber = GeminiTranscriber::from_config(&config.api, &config.dictation, api_key.clone());
        let recorder = DictationRecorder::new(
            Box::new(CpalCaptureSource::new(config.live.input_device.clone())),
            config.dictation.max_secs,
        );
        Dictation::new(recorder, Arc::new(transcriber))
    });

    // Live session controller
    let connector = GeminiLiveConnector::new(
        config.api.live_url.clone(),
        api_key,
        Duration::from_secs(config.live.setup_timeout_secs),
    );
    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let (live_tx, live_rx) = mpsc::channel(16);
    let controller = SessionController::new(
        config.live.clone(),
        language,
        Box::new(CpalCaptureSource::new(config.live.input_device.clone())),
        Box::new(CpalPlaybackOutput::new(config.live.output_device.clone())),
        Arc::new(connector),
    )
    .with_updates(update_tx);
    let live_task = tokio::task::spawn_local(controller.run(live_rx));

    // Front-end (blocks until the user leaves)
    let mut app = TerminalApp::new(chat, live_tx, update_rx, config, std::io::stdout())
        .with_settings_path(AppPaths::new().settings_file);
    if let Some(dictation) = dictation {
        app = app.with_dictation(dictation);
    }
    app.run(BufReader::new(tokio::io::stdin()))
        .await
        .context("terminal I/O failed")?;

    if let Err(e) = live_task.await {
        log::error!("Live session controller ended abnormally: {e}");
    }
    if let Some(speech) = speech {
        speech.shutdown();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Farmer Assistant starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. API key
    let api_key = config.api.resolve_key().unwrap_or_else(|| {
        log::warn!("No API key configured; set GEMINI_API_KEY or api.api_key in settings.toml");
        String::new()
    });

    // 4. Tokio runtime (2 worker threads: network loops + child processes)
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;
    let local = tokio::task::LocalSet::new();

    // 5–8. Components, controller and front-end
    let result = local.block_on(&rt, run(config, api_key));

    // The stdin reader may still be parked on a blocking read.
    drop(local);
    rt.shutdown_timeout(Duration::from_millis(500));
    result
}
