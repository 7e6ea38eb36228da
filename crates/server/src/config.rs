//! `journeyd` configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use journey_automation::AutomationConfig;
use journey_realtime::NotifierConfig;
use serde::{Deserialize, Serialize};

/// Errors loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("invalid config {path}: {source}")]
    Toml {
        /// File path
        path: PathBuf,
        /// Cause
        source: toml::de::Error,
    },
}

/// Full server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listener
    #[serde(default)]
    pub server: HttpConfig,
    /// Progress store
    #[serde(default)]
    pub storage: StorageConfig,
    /// Automation engine
    #[serde(default)]
    pub automation: AutomationSection,
    /// Realtime notifier
    #[serde(default)]
    pub realtime: RealtimeSection,
    /// Inbound webhooks
    #[serde(default)]
    pub webhooks: WebhookConfig,
}

impl ServerConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load `path`, or defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Per-request processing bound, SSE excluded
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// SSE keep-alive interval
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl HttpConfig {
    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Keep-alive interval as a duration.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}
fn default_request_timeout() -> u64 { 5 }
fn default_keep_alive() -> u64 { 15 }

/// Which store backs progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory; lost on restart
    Memory,
    /// One JSON file per checkpoint record
    #[default]
    Json,
}

/// Store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory for the JSON backend
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".journey")
}

/// Automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationSection {
    /// Remembered idempotency keys
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// Idempotency key lifetime
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_secs: u64,

    /// Immediate retries after a write conflict
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

impl Default for AutomationSection {
    fn default() -> Self {
        Self {
            dedup_capacity: default_dedup_capacity(),
            dedup_ttl_secs: default_dedup_ttl(),
            conflict_retries: default_conflict_retries(),
        }
    }
}

impl From<&AutomationSection> for AutomationConfig {
    fn from(section: &AutomationSection) -> Self {
        Self {
            dedup_capacity: section.dedup_capacity,
            dedup_ttl: Duration::from_secs(section.dedup_ttl_secs),
            conflict_retries: section.conflict_retries,
        }
    }
}

fn default_dedup_capacity() -> usize { 10_000 }
fn default_dedup_ttl() -> u64 { 86_400 }
fn default_conflict_retries() -> u32 { 1 }

/// Realtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSection {
    /// Per-subscription buffer
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl From<&RealtimeSection> for NotifierConfig {
    fn from(section: &RealtimeSection) -> Self {
        Self {
            subscriber_buffer: section.subscriber_buffer,
        }
    }
}

fn default_subscriber_buffer() -> usize { 64 }

/// Webhook settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared HMAC secret; signatures are enforced when set
    #[serde(default)]
    pub secret: Option<String>,

    /// JSON template catalog replacing the built-in one
    #[serde(default)]
    pub templates_path: Option<PathBuf>,
}
