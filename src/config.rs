//! Client configuration with persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::{ProfileStore, ServerProfile};

const APP_DIR: &str = "mpd-link";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("Failed to read config: {0}")]
  Io(#[from] std::io::Error),

  #[error("Malformed config: {0}")]
  Json(#[from] serde_json::Error),

  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Reconnect delay curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
  /// Delay before the first reconnect attempt.
  #[serde(default = "default_initial_ms")]
  pub initial_ms: u64,

  #[serde(default = "default_multiplier")]
  pub multiplier: f64,

  /// Upper bound for a single delay.
  #[serde(default = "default_max_ms")]
  pub max_ms: u64,

  /// A connection that stayed up this long resets the curve.
  #[serde(default = "default_stability_window_ms")]
  pub stability_window_ms: u64,
}

fn default_initial_ms() -> u64 {
  500
}

fn default_multiplier() -> f64 {
  2.0
}

fn default_max_ms() -> u64 {
  60_000
}

fn default_stability_window_ms() -> u64 {
  10_000
}

impl Default for BackoffConfig {
  fn default() -> Self {
    Self {
      initial_ms: default_initial_ms(),
      multiplier: default_multiplier(),
      max_ms: default_max_ms(),
      stability_window_ms: default_stability_window_ms(),
    }
  }
}

impl BackoffConfig {
  pub fn stability_window(&self) -> Duration {
    Duration::from_millis(self.stability_window_ms)
  }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
  /// TCP connect timeout in milliseconds.
  #[serde(default = "default_connect_timeout_ms")]
  pub connect_timeout_ms: u64,

  /// Maximum wait for a command response (and the greeting).
  #[serde(default = "default_response_timeout_ms")]
  pub response_timeout_ms: u64,

  /// Ping interval when idle mode is not in use.
  #[serde(default = "default_keepalive_interval_secs")]
  pub keepalive_interval_secs: u64,

  /// Use `idle` for change notifications when the server supports it.
  #[serde(default = "default_true")]
  pub use_idle: bool,

  #[serde(default = "default_true")]
  pub auto_reconnect: bool,

  /// Default wait for `RetryPolicy::OnceAfterReconnect`.
  #[serde(default = "default_retry_wait_ms")]
  pub retry_wait_ms: u64,

  #[serde(default)]
  pub backoff: BackoffConfig,

  #[serde(default)]
  pub profiles: Vec<ServerProfile>,
}

fn default_connect_timeout_ms() -> u64 {
  5_000
}

fn default_response_timeout_ms() -> u64 {
  10_000
}

fn default_keepalive_interval_secs() -> u64 {
  30
}

fn default_true() -> bool {
  true
}

fn default_retry_wait_ms() -> u64 {
  10_000
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      connect_timeout_ms: default_connect_timeout_ms(),
      response_timeout_ms: default_response_timeout_ms(),
      keepalive_interval_secs: default_keepalive_interval_secs(),
      use_idle: true,
      auto_reconnect: true,
      retry_wait_ms: default_retry_wait_ms(),
      backoff: BackoffConfig::default(),
      profiles: Vec::new(),
    }
  }
}

impl ClientConfig {
  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms)
  }

  pub fn response_timeout(&self) -> Duration {
    Duration::from_millis(self.response_timeout_ms)
  }

  pub fn keepalive_interval(&self) -> Duration {
    Duration::from_secs(self.keepalive_interval_secs)
  }

  pub fn retry_wait(&self) -> Duration {
    Duration::from_millis(self.retry_wait_ms)
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if self.connect_timeout_ms == 0 {
      return Err("Connect timeout must be greater than zero".to_string());
    }
    if self.response_timeout_ms == 0 {
      return Err("Response timeout must be greater than zero".to_string());
    }
    if self.keepalive_interval_secs == 0 {
      return Err("Keepalive interval must be at least 1 second".to_string());
    }
    if self.backoff.initial_ms == 0 {
      return Err("Initial reconnect delay must be greater than zero".to_string());
    }
    if self.backoff.multiplier.is_nan() || self.backoff.multiplier < 1.0 {
      return Err("Backoff multiplier must be at least 1".to_string());
    }
    if self.backoff.max_ms < self.backoff.initial_ms {
      return Err("Maximum reconnect delay cannot be below the initial delay".to_string());
    }
    for profile in &self.profiles {
      if profile.host.trim().is_empty() {
        return Err(format!("Profile '{}' has no host", profile.name));
      }
      if profile.port == 0 {
        return Err(format!("Profile '{}' has an invalid port", profile.name));
      }
    }
    Ok(())
  }

  /// `<config dir>/mpd-link/config.json`.
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
  }

  /// Read and validate a config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: ClientConfig = serde_json::from_str(&content)?;
    config.validate().map_err(ConfigError::Invalid)?;
    log::debug!("Loaded config from {}", path.display());
    Ok(config)
  }

  /// Load from `path`, or the default location, falling back to defaults
  /// when the file does not exist.
  pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
    let path = match path {
      Some(path) => path.to_path_buf(),
      None => match Self::default_path() {
        Some(path) => path,
        None => {
          log::warn!("No config directory available, using defaults");
          return Ok(Self::default());
        }
      },
    };

    match Self::load(&path) {
      Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
        log::info!("No config at {}, using defaults", path.display());
        Ok(Self::default())
      }
      other => other,
    }
  }

  /// Write the config as pretty JSON, creating parent directories.
  pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
    self.validate().map_err(ConfigError::Invalid)?;
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(self)?)?;
    Ok(())
  }
}

impl ProfileStore for ClientConfig {
  fn active_profile(&self) -> Option<ServerProfile> {
    self.profiles.active_profile()
  }
}
