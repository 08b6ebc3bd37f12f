use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clipboard::CopyOptions;

/// CLI defaults, read from `config.json` when present.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    pub clipboard_attempts: u32,
    pub clipboard_settle_ms: u64,
    pub clipboard_backoff_ms: u64,
    pub uri_compat: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            clipboard_attempts: 3,
            clipboard_settle_ms: 100,
            clipboard_backoff_ms: 250,
            uri_compat: false,
        }
    }
}

impl Settings {
    /// Loads from [`config_path`]; a missing file yields the defaults.
    pub fn load() -> anyhow::Result<Self> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Settings::default()),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Settings::default());
        }
        let data = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&data)?;
        Ok(settings)
    }

    pub fn copy_options(&self, retry: bool) -> CopyOptions {
        CopyOptions {
            retry,
            attempts: self.clipboard_attempts,
            settle_delay: Duration::from_millis(self.clipboard_settle_ms),
            backoff: Duration::from_millis(self.clipboard_backoff_ms),
            report_busy: true,
        }
    }
}

/// `$OTPKEEP_CONFIG`, else `<config dir>/otpkeep/config.json`.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("OTPKEEP_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("otpkeep").join("config.json"))
}

pub fn save_settings(settings: &Settings, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let s = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, s)?;
    Ok(())
}
