use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on how long the loop sleeps between evaluations, even
    /// when no job is due sooner (seconds).
    #[serde(default = "default_max_tick_secs")]
    pub max_tick_secs: u64,
    /// Maximum duration of one execution session (seconds). A session that
    /// exceeds this is closed; nothing unconfirmed is ever sent.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
}

fn default_max_tick_secs() -> u64 {
    60
}

fn default_session_timeout_secs() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_tick_secs: default_max_tick_secs(),
            session_timeout_secs: default_session_timeout_secs(),
        }
    }
}

/// Default destination for jobs added without an explicit channel/recipient.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Top-level nudge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NudgeConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Override for the job database path (defaults to ~/.nudge/nudge.db).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

impl NudgeConfig {
    /// Resolve the job database path.
    pub fn store_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.store_path {
            Some(p) => Ok(p.clone()),
            None => Ok(config_dir()?.join("nudge.db")),
        }
    }
}

/// Resolve the nudge config directory (~/.nudge/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".nudge"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.nudge/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<NudgeConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<NudgeConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(NudgeConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: NudgeConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NudgeConfig::default();
        assert_eq!(config.scheduler.max_tick_secs, 60);
        assert_eq!(config.scheduler.session_timeout_secs, 300);
        assert!(config.delivery.channel.is_none());
    }

    #[test]
    fn test_json5_parse() {
        let json5_str = r#"{
            scheduler: { max_tick_secs: 10, session_timeout_secs: 30 },
            delivery: { channel: "telegram", to: "chat-42" },
        }"#;
        let config: NudgeConfig = json5::from_str(json5_str).unwrap();
        assert_eq!(config.scheduler.max_tick_secs, 10);
        assert_eq!(config.scheduler.session_timeout_secs, 30);
        assert_eq!(config.delivery.channel, Some("telegram".into()));
        assert_eq!(config.delivery.to, Some("chat-42".into()));
    }

    #[test]
    fn test_store_path_override() {
        let config: NudgeConfig = json5::from_str(r#"{ store_path: "/tmp/jobs.db" }"#).unwrap();
        assert_eq!(config.store_path().unwrap(), PathBuf::from("/tmp/jobs.db"));
    }
}
