use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::QalaError;

/// Top-level Qalabot configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// General bot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    pub telegram: Option<TelegramConfig>,
}

/// Telegram bot config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
}

/// Backend API config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    /// Optional bearer token for the backend API.
    #[serde(default)]
    pub api_token: String,
    /// Bounded per-call timeout. A call exceeding it counts as a backend
    /// failure and the step's draft is preserved.
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            api_token: String::new(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

/// Conversation session config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a conversation may sit idle before the sweeper evicts it.
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,
    /// How often the sweeper runs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// How long a per-user worker waits for the next update before exiting.
    #[serde(default = "default_worker_idle")]
    pub worker_idle_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_threshold_secs: default_idle_threshold(),
            sweep_interval_secs: default_sweep_interval(),
            worker_idle_secs: default_worker_idle(),
        }
    }
}

// --- Default value functions ---

fn default_name() -> String {
    "Qalabot".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_backend_timeout() -> u64 {
    15
}
fn default_idle_threshold() -> u64 {
    3600
}
fn default_sweep_interval() -> u64 {
    3600
}
fn default_worker_idle() -> u64 {
    600
}

/// Load config from a TOML file.
///
/// A missing file yields the defaults. The `TELEGRAM_BOT_TOKEN` env var
/// overrides the file value so tokens can stay out of the config file.
pub fn load(path: &str) -> Result<Config, QalaError> {
    let path = Path::new(path);

    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| QalaError::Config(format!("failed to parse {}: {e}", path.display())))?
    } else {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        Config::default()
    };

    if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
        if !token.is_empty() {
            let tg = config.channel.telegram.get_or_insert_with(|| TelegramConfig {
                enabled: true,
                bot_token: String::new(),
            });
            tg.bot_token = token;
        }
    }

    Ok(config)
}
