//! Response decoding.
//!
//! The decoder is a restartable state machine over an append-only byte
//! buffer: bytes are fed as they arrive from the socket and complete blocks
//! are pulled out once their terminator line has been seen. Feeding the same
//! stream in any number of chunks yields the same blocks.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

const OK: &str = "OK";
const LIST_OK: &str = "list_OK";
const ACK_PREFIX: &str = "ACK ";
const GREETING_PREFIX: &str = "OK MPD ";

/// Longest line accepted from the server, terminator excluded.
pub const MAX_LINE_LENGTH: usize = 1 << 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
  #[error("Malformed response line: {0}")]
  Syntax(String),
  #[error("Unexpected server greeting: {0}")]
  Greeting(String),
  #[error("list_OK received outside of a command list")]
  UnexpectedListOk,
}

/// How a response block was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
  /// `OK`, end of the whole response.
  Ok,
  /// `list_OK`, end of one sub-command inside a command list.
  ListOk,
}

/// One decoded unit of server output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBlock {
  pairs: Vec<(String, String)>,
  terminator: Terminator,
}

impl ResponseBlock {
  pub fn new(pairs: Vec<(String, String)>, terminator: Terminator) -> Self {
    Self { pairs, terminator }
  }

  /// Empty block terminated by `OK`.
  pub fn empty() -> Self {
    Self::new(Vec::new(), Terminator::Ok)
  }

  pub fn pairs(&self) -> &[(String, String)] {
    &self.pairs
  }

  pub fn into_pairs(self) -> Vec<(String, String)> {
    self.pairs
  }

  pub fn terminator(&self) -> Terminator {
    self.terminator
  }

  pub fn is_empty(&self) -> bool {
    self.pairs.is_empty()
  }

  /// First value for `key` (case-sensitive, as sent by the server).
  pub fn get(&self, key: &str) -> Option<&str> {
    self
      .pairs
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.as_str())
  }

  /// All values for `key`, in order.
  pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    self
      .pairs
      .iter()
      .filter(move |(k, _)| k == key)
      .map(|(_, v)| v.as_str())
  }
}

/// Numeric ACK error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AckCode {
  NotList,
  Argument,
  Password,
  Permission,
  UnknownCommand,
  NoExist,
  PlaylistMax,
  System,
  PlaylistLoad,
  UpdateAlready,
  PlayerSync,
  Exist,
  Other(u32),
}

impl AckCode {
  pub fn from_code(code: u32) -> Self {
    match code {
      1 => AckCode::NotList,
      2 => AckCode::Argument,
      3 => AckCode::Password,
      4 => AckCode::Permission,
      5 => AckCode::UnknownCommand,
      50 => AckCode::NoExist,
      51 => AckCode::PlaylistMax,
      52 => AckCode::System,
      53 => AckCode::PlaylistLoad,
      54 => AckCode::UpdateAlready,
      55 => AckCode::PlayerSync,
      56 => AckCode::Exist,
      other => AckCode::Other(other),
    }
  }
}

/// Well-formed failure response: `ACK [code@index] {command} message`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("ACK [{code}@{index}] {{{command}}} {message}")]
pub struct AckError {
  pub code: u32,
  /// Position of the failing command inside a command list (0 otherwise).
  pub index: usize,
  pub command: String,
  pub message: String,
}

impl AckError {
  pub fn kind(&self) -> AckCode {
    AckCode::from_code(self.code)
  }

  /// Parse an `ACK` line (with or without the `ACK ` prefix).
  pub fn parse(line: &str) -> Result<Self, ProtocolError> {
    let syntax = || ProtocolError::Syntax(line.to_string());
    let rest = line.strip_prefix(ACK_PREFIX).unwrap_or(line);

    let rest = rest.strip_prefix('[').ok_or_else(syntax)?;
    let (position, rest) = rest.split_once(']').ok_or_else(syntax)?;
    let (code, index) = position.split_once('@').ok_or_else(syntax)?;
    let code = code.trim().parse::<u32>().map_err(|_| syntax())?;
    let index = index.trim().parse::<usize>().map_err(|_| syntax())?;

    let rest = rest.trim_start();
    let (command, message) = match rest.strip_prefix('{') {
      Some(inner) => {
        let (command, message) = inner.split_once('}').ok_or_else(syntax)?;
        (command.to_string(), message.trim_start().to_string())
      }
      None => (String::new(), rest.to_string()),
    };

    Ok(Self {
      code,
      index,
      command,
      message,
    })
  }
}

/// A complete decoded response unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
  Block(ResponseBlock),
  Ack(AckError),
}

/// Server protocol version from the connection greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ServerVersion {
  pub major: u32,
  pub minor: u32,
  pub patch: u32,
}

impl ServerVersion {
  pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
    Self {
      major,
      minor,
      patch,
    }
  }

  /// Parse `OK MPD 0.23.5`.
  pub fn from_greeting(line: &str) -> Result<Self, ProtocolError> {
    let line = line.trim_end();
    let version = line
      .strip_prefix(GREETING_PREFIX)
      .ok_or_else(|| ProtocolError::Greeting(line.to_string()))?;

    let mut parts = version.trim().split('.').map(str::parse::<u32>);
    let mut next = || -> Result<u32, ProtocolError> {
      match parts.next() {
        Some(Ok(n)) => Ok(n),
        Some(Err(_)) => Err(ProtocolError::Greeting(line.to_string())),
        None => Ok(0),
      }
    };
    let major = next()?;
    let minor = next()?;
    let patch = next()?;
    Ok(Self::new(major, minor, patch))
  }

  pub fn at_least(&self, major: u32, minor: u32, patch: u32) -> bool {
    *self >= Self::new(major, minor, patch)
  }
}

impl fmt::Display for ServerVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
  }
}

/// Incremental response decoder.
#[derive(Debug, Default)]
pub struct ResponseDecoder {
  buf: Vec<u8>,
  pending: Vec<(String, String)>,
  /// Length of the unterminated line at the end of `buf`.
  tail: usize,
}

impl ResponseDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append raw bytes read from the transport.
  ///
  /// Fails once an unterminated line grows past [`MAX_LINE_LENGTH`].
  pub fn feed(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
    let tail = match bytes.iter().rposition(|b| *b == b'\n') {
      Some(end) => bytes.len() - end - 1,
      None => self.tail + bytes.len(),
    };
    if tail > MAX_LINE_LENGTH {
      return Err(ProtocolError::Syntax(format!(
        "line longer than {} bytes",
        MAX_LINE_LENGTH
      )));
    }
    self.tail = tail;
    self.buf.extend_from_slice(bytes);
    Ok(())
  }

  /// True when no partial line or partial block is pending.
  pub fn is_idle(&self) -> bool {
    self.buf.is_empty() && self.pending.is_empty()
  }

  /// Pop one complete raw line, e.g. the connection greeting.
  pub fn next_line(&mut self) -> Option<String> {
    let end = self.buf.iter().position(|b| *b == b'\n')?;
    let raw: Vec<u8> = self.buf.drain(..=end).collect();
    let line = String::from_utf8_lossy(&raw[..end]);
    Some(line.trim_end_matches('\r').to_string())
  }

  /// Pop the next complete block, if its terminator has arrived.
  ///
  /// Lines of an unfinished block are kept between calls, so a block split
  /// across several reads is assembled exactly once.
  pub fn next_block(&mut self) -> Result<Option<Decoded>, ProtocolError> {
    while let Some(line) = self.next_line() {
      if line == OK {
        let pairs = std::mem::take(&mut self.pending);
        return Ok(Some(Decoded::Block(ResponseBlock::new(pairs, Terminator::Ok))));
      }
      if line == LIST_OK {
        let pairs = std::mem::take(&mut self.pending);
        return Ok(Some(Decoded::Block(ResponseBlock::new(
          pairs,
          Terminator::ListOk,
        ))));
      }
      if line.starts_with(ACK_PREFIX) {
        self.pending.clear();
        return AckError::parse(&line).map(|ack| Some(Decoded::Ack(ack)));
      }

      let (key, value) = line
        .split_once(": ")
        .or_else(|| line.strip_suffix(':').map(|key| (key, "")))
        .ok_or_else(|| ProtocolError::Syntax(line.clone()))?;
      if key.is_empty() {
        return Err(ProtocolError::Syntax(line));
      }
      self.pending.push((key.to_string(), value.to_string()));
    }
    Ok(None)
  }
}
