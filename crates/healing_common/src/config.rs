//! Configuration for the healing daemon and client.
//!
//! Loads settings from /etc/luminous/healing.toml or uses defaults, then
//! applies environment overrides once. Every key is optional.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/luminous/healing.toml";

/// Shared secret used when nothing else is configured
pub const INSECURE_DEFAULT_SECRET: &str = "default-dev-key";

pub const ENV_SECRET: &str = "LUMINOUS_HEALING_SECRET";
pub const ENV_SOCKET: &str = "LUMINOUS_HEALING_SOCKET";
pub const ENV_CONFIG: &str = "LUMINOUS_HEALING_CONFIG";

/// Per-action rate limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum invocations of one action inside the window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_requests() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    300 // 5 minutes
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingConfig {
    /// Unix socket the daemon listens on
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Socket file mode
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Group owning the socket; clients must be members
    #[serde(default = "default_socket_group")]
    pub socket_group: String,

    /// NDJSON audit log written by the daemon
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: PathBuf,

    /// HMAC key shared by client and daemon
    #[serde(default = "default_secret")]
    pub secret: String,

    /// Maximum distance between request timestamp and daemon clock, 0 disables
    #[serde(default = "default_max_request_age")]
    pub max_request_age_secs: u64,

    /// How long the daemon waits for a client to finish writing
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Client connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(crate::protocol::DEFAULT_SOCKET_PATH)
}

fn default_socket_mode() -> u32 {
    0o660
}

fn default_socket_group() -> String {
    "luminous".to_string()
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("/var/log/luminous-healing/audit.jsonl")
}

fn default_secret() -> String {
    INSECURE_DEFAULT_SECRET.to_string()
}

fn default_max_request_age() -> u64 {
    300
}

fn default_read_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    200
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
            socket_group: default_socket_group(),
            audit_log_path: default_audit_log_path(),
            secret: default_secret(),
            max_request_age_secs: default_max_request_age(),
            read_timeout_secs: default_read_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl HealingConfig {
    /// Load from `$LUMINOUS_HEALING_CONFIG` or the default path, falling back
    /// to defaults, then apply environment overrides.
    pub fn load() -> Self {
        let path = std::env::var(ENV_CONFIG).unwrap_or_else(|_| CONFIG_PATH.to_string());
        let mut config = Self::load_from_path(&path).unwrap_or_else(|e| {
            warn!("Config not loaded from {}, using defaults: {}", path, e);
            HealingConfig::default()
        });
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Load config from a specific path, no environment overrides
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: HealingConfig = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply environment overrides. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup(ENV_SECRET).filter(|v| !v.is_empty()) {
            self.secret = secret;
        }
        if let Some(socket) = lookup(ENV_SOCKET).filter(|v| !v.is_empty()) {
            self.socket_path = PathBuf::from(socket);
        }
    }

    pub fn uses_default_secret(&self) -> bool {
        self.secret == INSECURE_DEFAULT_SECRET
    }
}
