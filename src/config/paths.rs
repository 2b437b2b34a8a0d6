//! Where `settings.toml` lives.
//!
//! `FARMER_ASSISTANT_CONFIG_DIR` overrides the platform default, which is:
//!
//!   Windows: %APPDATA%\farmer-assistant\
//!   macOS:   ~/Library/Application Support/farmer-assistant/
//!   Linux:   ~/.config/farmer-assistant/

use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config directory.
pub const CONFIG_DIR_ENV: &str = "FARMER_ASSISTANT_CONFIG_DIR";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    /// `config_dir/settings.toml`.
    pub settings_file: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "farmer-assistant";

    /// Resolve the config directory from the environment, then `dirs`,
    /// then the current directory.
    pub fn new() -> Self {
        match std::env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
            Some(dir) => Self::in_dir(PathBuf::from(dir)),
            None => Self::in_dir(
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(Self::APP_NAME),
            ),
        }
    }

    /// Paths rooted at `config_dir`.
    pub fn in_dir(config_dir: impl AsRef<Path>) -> Self {
        let config_dir = config_dir.as_ref().to_path_buf();
        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
