//! Application settings management

use crate::PathManager;
use serde::{Deserialize, Serialize};
use std::fs;

fn default_server_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_history_limit() -> usize {
    20
}

fn default_reconnect_delay_secs() -> u64 {
    3
}

fn default_capture_chunk_ms() -> u64 {
    100
}

/// Application settings stored in settings.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the conversation backend (REST + auth endpoints)
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Voice to request from the backend TTS, if any
    pub voice_id: Option<String>,
    /// Sampling temperature forwarded to the backend LLM, if any
    pub temperature: Option<f32>,
    /// Maximum number of history entries kept and sent with each turn
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Delay before re-dialing a dropped websocket connection
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Cadence at which the capture controller emits audio chunks
    #[serde(default = "default_capture_chunk_ms")]
    pub capture_chunk_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            server_url: default_server_url(),
            voice_id: None,
            temperature: None,
            history_limit: default_history_limit(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            capture_chunk_ms: default_capture_chunk_ms(),
        }
    }
}

impl Settings {
    /// Load settings from the settings file, or return defaults if not found
    pub fn load() -> Self {
        let Some(path) = PathManager::settings_path() else {
            return Self::default();
        };

        let Ok(content) = fs::read_to_string(&path) else {
            return Self::default();
        };

        toml::from_str(&content).unwrap_or_default()
    }

    /// Save settings to the settings file
    pub fn save(&self) -> Result<(), String> {
        let path = PathManager::settings_path().ok_or("Could not determine settings path")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config dir: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;
        fs::write(&path, content).map_err(|e| format!("Failed to write settings: {}", e))?;
        Ok(())
    }

    /// Websocket URL for the duplex chat channel, with the bearer token as a
    /// query parameter (the browser websocket API cannot set headers, and the
    /// backend reads `?token=` accordingly).
    pub fn ws_chat_url(&self, token: &str) -> String {
        let base = if let Some(rest) = self.server_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.server_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            format!("ws://{}", self.server_url)
        };
        format!("{}/ws/chat?token={}", base.trim_end_matches('/'), token)
    }
}
