use crate::error::{Result, RiftError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "rift";
const APP_NAME: &str = "rift";
const CONFIG_FILE: &str = "config.json";

/// Directory override, mostly for tests
const CONFIG_DIR_ENV: &str = "RIFT_CONFIG_DIR";
const RELAY_URL_ENV: &str = "RIFT_RELAY_URL";
const WORDLIST_ENV: &str = "RIFT_WORDLIST";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiftConfig {
    /// WebSocket URL of the signaling relay
    pub relay_url: String,
    /// Label of the data channel opened by the sender
    pub channel_label: String,
    /// Bytes of file payload per chunk frame
    pub chunk_size: usize,
    /// Sender pauses while the channel buffers more than this many bytes
    pub buffer_threshold: usize,
    /// Number of words in a passphrase
    pub passphrase_length: usize,
    pub stun_servers: Vec<String>,
    /// Tab-separated `code<TAB>word` resource used by the code generator
    pub wordlist_path: Option<PathBuf>,
    pub backpressure_poll_ms: u64,
    /// Receiver gives up when the channel stays silent this long
    pub receive_idle_timeout_secs: u64,
    /// How long the sender waits for the receiver to hang up after the last chunk
    pub sender_linger_secs: u64,
    pub download_dir: PathBuf,
}

impl Default for RiftConfig {
    fn default() -> Self {
        let download_dir = directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rift");

        Self {
            relay_url: "ws://127.0.0.1:8080".to_string(),
            channel_label: "rift".to_string(),
            chunk_size: 16 * 1024,
            buffer_threshold: 64 * 1024,
            passphrase_length: 6,
            stun_servers: vec![
                "stun:stun.cloudflare.com:3478".to_string(),
                "stun:stun.cloudflare.com:53".to_string(),
            ],
            wordlist_path: None,
            backpressure_poll_ms: 100,
            receive_idle_timeout_secs: 60,
            sender_linger_secs: 2,
            download_dir,
        }
    }
}

impl RiftConfig {
    /// Get the config file path
    fn get_config_path() -> Option<PathBuf> {
        get_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from disk or return default, then apply env overrides
    pub fn load() -> Self {
        let mut config = match Self::get_config_path() {
            Some(path) => match fs::read_to_string(&path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    tracing::warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                    Self::default()
                }),
                Err(_) => Self::default(),
            },
            None => Self::default(),
        };
        config.apply_env();
        config
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::get_config_path()
            .ok_or_else(|| RiftError::Config("no config directory available".to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| RiftError::Config(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(RELAY_URL_ENV) {
            self.relay_url = url;
        }
        if let Ok(path) = std::env::var(WORDLIST_ENV) {
            self.wordlist_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.relay_url)
            .map_err(|e| RiftError::Config(format!("relay_url {}: {}", self.relay_url, e)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(RiftError::Config(format!(
                "relay_url must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }
        if self.chunk_size == 0 || self.chunk_size > u32::MAX as usize {
            return Err(RiftError::Config(format!(
                "chunk_size {} out of range",
                self.chunk_size
            )));
        }
        if self.passphrase_length == 0 {
            return Err(RiftError::Config("passphrase_length must be > 0".to_string()));
        }
        if self.channel_label.is_empty() {
            return Err(RiftError::Config("channel_label must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn backpressure_poll(&self) -> Duration {
        Duration::from_millis(self.backpressure_poll_ms)
    }

    pub fn receive_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_idle_timeout_secs)
    }

    pub fn sender_linger(&self) -> Duration {
        Duration::from_secs(self.sender_linger_secs)
    }
}

/// Get the config directory path for this app
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}
