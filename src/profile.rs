//! Server profiles and where they come from.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One configured music server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProfile {
  /// Display name.
  pub name: String,

  pub host: String,

  #[serde(default = "default_port")]
  pub port: u16,

  #[serde(default)]
  pub password: Option<String>,

  /// Preferred profile when several are configured.
  #[serde(default)]
  pub default: bool,
}

fn default_port() -> u16 {
  6600
}

impl ServerProfile {
  pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
    Self {
      name: name.into(),
      host: host.into(),
      port,
      password: None,
      default: false,
    }
  }

  pub fn with_password(mut self, password: impl Into<String>) -> Self {
    self.password = Some(password.into());
    self
  }

  /// Password to send, if one is set and non-empty.
  pub fn credentials(&self) -> Option<&str> {
    self.password.as_deref().filter(|p| !p.is_empty())
  }

  /// `host:port` for log messages.
  pub fn address(&self) -> String {
    if self.host.contains(':') {
      format!("[{}]:{}", self.host, self.port)
    } else {
      format!("{}:{}", self.host, self.port)
    }
  }
}

impl fmt::Debug for ServerProfile {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ServerProfile")
      .field("name", &self.name)
      .field("host", &self.host)
      .field("port", &self.port)
      .field("password", &self.password.as_ref().map(|_| "****"))
      .field("default", &self.default)
      .finish()
  }
}

/// Source of the profile a session should connect to.
pub trait ProfileStore: Send + Sync {
  fn active_profile(&self) -> Option<ServerProfile>;
}

impl ProfileStore for ServerProfile {
  fn active_profile(&self) -> Option<ServerProfile> {
    Some(self.clone())
  }
}

impl ProfileStore for Vec<ServerProfile> {
  fn active_profile(&self) -> Option<ServerProfile> {
    self
      .iter()
      .find(|p| p.default)
      .or_else(|| self.first())
      .cloned()
  }
}
