//! Per-session context injected into the transport and the sync service.

use helio_vcs_core::SyncSettings;
use std::time::Duration;

/// Who is talking to which remote, and how patiently
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub base_url: String,
    pub api_token: Option<String>,
    pub device_id: String,
    pub connect_attempts: u32,
    pub request_timeout: Duration,
    /// How long dropping the sync service waits for a running session
    pub stop_timeout: Duration,
}

impl SessionContext {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone().filter(|t| !t.is_empty()),
            device_id: settings.device_id.clone(),
            connect_attempts: settings.connect_attempts.max(1),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            stop_timeout: Duration::from_millis(settings.stop_timeout_ms),
        }
    }

    pub fn user_agent() -> String {
        format!(
            "Helio VCS {} on {}",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS
        )
    }
}

impl From<&SyncSettings> for SessionContext {
    fn from(settings: &SyncSettings) -> Self {
        Self::from_settings(settings)
    }
}
