//! Configuration loading and management
//!
//! Handles parsing of `tasksync.toml` configuration files.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Store gateway configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Suggestion assistant configuration
    #[serde(default)]
    pub assist: AssistConfig,

    /// Notification delivery configuration
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            assist: AssistConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

/// Store gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the task store REST endpoint
    #[serde(default = "default_store_url")]
    pub base_url: String,

    /// API key sent as a bearer token, when the store requires one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-call deadline in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Bounded retry count for retryable store failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retries in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Delay before re-subscribing after a feed disconnect, in milliseconds
    #[serde(default = "default_resubscribe_delay_ms")]
    pub resubscribe_delay_ms: u64,

    /// Re-subscribe attempts per disconnect incident before giving up
    #[serde(default = "default_max_resubscribe_attempts")]
    pub max_resubscribe_attempts: u32,

    /// Long-poll wait for the change-feed cursor endpoint, in seconds
    #[serde(default = "default_poll_wait_secs")]
    pub poll_wait_secs: u64,
}

fn default_store_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    250
}

fn default_resubscribe_delay_ms() -> u64 {
    1_000
}

fn default_max_resubscribe_attempts() -> u32 {
    5
}

fn default_poll_wait_secs() -> u64 {
    25
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_store_url(),
            api_key: None,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            resubscribe_delay_ms: default_resubscribe_delay_ms(),
            max_resubscribe_attempts: default_max_resubscribe_attempts(),
            poll_wait_secs: default_poll_wait_secs(),
        }
    }
}

/// Suggestion assistant configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistConfig {
    /// Base URL of the assist API
    #[serde(default = "default_assist_url")]
    pub base_url: String,

    /// Per-call deadline in milliseconds
    #[serde(default = "default_assist_timeout_ms")]
    pub timeout_ms: u64,

    /// Drop tasks absent from every AI group instead of bucketing them
    /// under "Ungrouped"
    #[serde(default)]
    pub drop_ungrouped: bool,
}

fn default_assist_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_assist_timeout_ms() -> u64 {
    30_000
}

impl AssistConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            base_url: default_assist_url(),
            timeout_ms: default_assist_timeout_ms(),
            drop_ungrouped: false,
        }
    }
}

/// Notification delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Endpoint of the push delivery collaborator
    #[serde(default = "default_notify_url")]
    pub endpoint: String,

    /// Per-call deadline in milliseconds
    #[serde(default = "default_notify_timeout_ms")]
    pub timeout_ms: u64,

    /// Link opened when the recipient activates the notification
    #[serde(default = "default_notify_link")]
    pub link_url: String,
}

fn default_notify_url() -> String {
    "http://localhost:3000/api/send-notification".to_string()
}

fn default_notify_timeout_ms() -> u64 {
    5_000
}

fn default_notify_link() -> String {
    "/".to_string()
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            endpoint: default_notify_url(),
            timeout_ms: default_notify_timeout_ms(),
            link_url: default_notify_link(),
        }
    }
}

impl Config {
    /// Load configuration from a `tasksync.toml` file
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a directory, or return defaults
    pub fn load_from_dir(dir: &Path) -> Self {
        let config_path = dir.join("tasksync.toml");
        if config_path.exists() {
            Self::load(&config_path).unwrap_or_default()
        } else {
            Self::default()
        }
    }
}
