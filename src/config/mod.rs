use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_PORT: u16 = 4400;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

// ─── ServerConfig ────────────────────────────────────────────────────────────

/// HTTP server configuration (`[server]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (default: 127.0.0.1; use 0.0.0.0 for LAN access).
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

// ─── WebhookConfig ───────────────────────────────────────────────────────────

/// Webhook egress configuration (`[webhook]` in config.toml).
///
/// `target_url` may also come from the `WEBHOOK_TARGET_URL` environment
/// variable, which takes precedence over the file. When neither is set,
/// webhook dispatch is a logged no-op.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub target_url: Option<String>,
    /// Per-delivery timeout in seconds (default: 15).
    pub timeout_secs: u64,
    /// Delay before the single retry of a failed delivery (default: 60).
    pub retry_delay_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            target_url: None,
            timeout_secs: 15,
            retry_delay_secs: 60,
        }
    }
}

// ─── ObservabilityConfig ─────────────────────────────────────────────────────

/// Observability configuration (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds).
    /// Set to 0 to disable slow query logging. Default: 100.
    pub slow_query_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 100,
        }
    }
}

// ─── AppConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the SQLite database.
    pub data_dir: PathBuf,
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server: ServerConfig::default(),
            webhook: WebhookConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path` (when given and present), then apply
    /// environment overrides. A missing file is not an error — defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config file {}", p.display()))?;
                let parsed: AppConfig = toml::from_str(&raw)
                    .with_context(|| format!("invalid config file {}", p.display()))?;
                info!(path = %p.display(), "loaded config file");
                parsed
            }
            Some(p) => {
                warn!(path = %p.display(), "config file not found — using defaults");
                AppConfig::default()
            }
            None => AppConfig::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("WEBHOOK_TARGET_URL") {
            if !url.is_empty() {
                self.webhook.target_url = Some(url);
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }
}
