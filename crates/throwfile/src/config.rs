//! Configuration types for a transfer session

use crate::transfer::CHUNK_SIZE;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for a [`Session`](crate::Session)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket relay URL (ws:// or wss://); `?channel=<id>` is appended on connect
    pub signaling_url: String,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Label of the locally created data channel (default: "file")
    pub data_channel_label: String,

    /// How long a send request waits for the data channel to open (default: 10000ms)
    pub channel_open_timeout_ms: u64,

    /// Buffered bytes above which the chunk sender pauses (default: 1 MiB)
    pub max_buffered_amount: usize,

    /// Poll interval while the chunk sender is paused (default: 5ms)
    pub buffered_poll_interval_ms: u64,

    /// How long a finished send may take to drain the channel's send buffer
    /// before it counts as failed (default: 30000ms)
    pub send_flush_timeout_ms: u64,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            data_channel_label: "file".to_string(),
            channel_open_timeout_ms: 10_000,
            max_buffered_amount: 1024 * 1024,
            buffered_poll_interval_ms: 5,
            send_flush_timeout_ms: 30_000,
        }
    }
}

impl SessionConfig {
    /// Parse a TOML document; missing keys fall back to defaults
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::InvalidConfig(format!("Invalid TOML: {}", e)))
    }

    /// Load a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Apply `THROWFILE_*` environment overrides
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var("THROWFILE_SIGNALING_URL") {
            self.signaling_url = url;
        }
        if let Ok(servers) = std::env::var("THROWFILE_STUN_SERVERS") {
            self.stun_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(ms) = std::env::var("THROWFILE_OPEN_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.channel_open_timeout_ms = ms;
            }
        }
        self
    }

    /// Data channel open deadline
    pub fn channel_open_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_open_timeout_ms)
    }

    /// Back-pressure poll interval
    pub fn buffered_poll_interval(&self) -> Duration {
        Duration::from_millis(self.buffered_poll_interval_ms)
    }

    /// Deadline for the send buffer to empty after `file-complete`
    pub fn send_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.send_flush_timeout_ms)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a WebSocket URL
    /// - `channel_open_timeout_ms` or `send_flush_timeout_ms` is zero
    /// - `max_buffered_amount` is smaller than one chunk
    /// - `data_channel_label` is empty
    pub fn validate(&self) -> Result<()> {
        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.channel_open_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "channel_open_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.send_flush_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "send_flush_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.max_buffered_amount < CHUNK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "max_buffered_amount must be at least {} bytes, got {}",
                CHUNK_SIZE, self.max_buffered_amount
            )));
        }

        if self.data_channel_label.is_empty() {
            return Err(Error::InvalidConfig(
                "data_channel_label must not be empty".to_string(),
            ));
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN url must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        Ok(())
    }
}
