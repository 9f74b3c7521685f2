use serde::Serialize;

use crate::protocol::ServerVersion;

/// Protocol features available on the connected server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
  pub version: ServerVersion,
  pub password: bool,
  pub command_lists: bool,
  pub idle: bool,
  /// `list <tag> group <tag>`.
  pub grouped_list: bool,
}

impl ServerCapabilities {
  pub fn from_version(version: ServerVersion) -> Self {
    Self {
      version,
      password: version.at_least(0, 10, 0),
      command_lists: version.at_least(0, 12, 0),
      idle: version.at_least(0, 14, 0),
      grouped_list: version.at_least(0, 21, 0),
    }
  }
}
