//! Sync settings persisted as JSON.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_BASE_URL: &str = "https://api.helio.fm";

/// Settings file name inside a settings directory
pub const SETTINGS_FILE: &str = "sync-settings.json";

/// Connection settings for the remote project store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Base URL of the remote API, without trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token of the logged-in user, if any.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Identifier of this device, sent with every request.
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// How many times a request is attempted when the connection fails.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How long dropping a sync service waits for its worker.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_device_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_stop_timeout_ms() -> u64 {
    1000
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            device_id: default_device_id(),
            connect_attempts: default_connect_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl SyncSettings {
    /// Load settings from a JSON file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read sync settings from {:?}", path))?;
        let settings: SyncSettings =
            serde_json::from_str(&data).with_context(|| "Failed to parse sync settings JSON")?;
        Ok(settings)
    }

    /// Save settings to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn is_logged_in(&self) -> bool {
        self.api_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}
