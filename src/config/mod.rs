//! Configuration module for the farmer assistant.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for each subsystem,
//! `AppPaths` for cross-platform directories, and TOML persistence via
//! `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::{AppPaths, CONFIG_DIR_ENV};
pub use settings::{
    ApiConfig, AppConfig, ChatConfig, DictationConfig, LiveConfig, SpeechConfig, API_KEY_ENV_VARS,
};
