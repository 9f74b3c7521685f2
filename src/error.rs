//! Crate-wide error type.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{AckError, ProtocolError};

/// Errors that can occur when talking to the music server.
#[derive(Debug, Error)]
pub enum Error {
  #[error("Transport error: {0}")]
  Transport(#[from] std::io::Error),

  #[error("No response within {0:?}")]
  Timeout(Duration),

  #[error("Protocol error: {0}")]
  Protocol(#[from] ProtocolError),

  #[error("Server error: {0}")]
  Server(#[from] AckError),

  #[error("Not connected to server")]
  NotConnected,

  #[error("Connection attempt already in progress")]
  AlreadyConnecting,

  #[error("Already connected")]
  AlreadyConnected,

  #[error("Connection lost: {0}")]
  ConnectionLost(String),

  #[error("Connection attempt aborted by disconnect")]
  ConnectAborted,

  #[error("Command cancelled")]
  Cancelled,

  #[error("No server profile configured")]
  NoProfile,

  #[error("Invalid argument: {0}")]
  InvalidArgument(String),
}

impl Error {
  /// Whether this error means the connection can no longer be trusted.
  ///
  /// These demote the connection state and trigger the reconnect loop.
  pub fn is_connection_failure(&self) -> bool {
    matches!(
      self,
      Error::Transport(_) | Error::Timeout(_) | Error::Protocol(_)
    )
  }

  /// Whether a retry after reconnecting could succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Error::NotConnected | Error::ConnectionLost(_))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
