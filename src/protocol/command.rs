//! Outgoing MPD commands and their line encoding.
//!
//! Reference: https://mpd.readthedocs.io/en/latest/protocol.html#requests

use std::fmt;

use super::codec::ProtocolError;

/// Command sent to the server as a single protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
  verb: String,
  args: Vec<String>,
}

impl Command {
  /// Create a command with no arguments.
  pub fn new(verb: impl Into<String>) -> Self {
    Self {
      verb: verb.into(),
      args: Vec::new(),
    }
  }

  /// Append an argument.
  pub fn arg(mut self, arg: impl ToString) -> Self {
    self.args.push(arg.to_string());
    self
  }

  /// Append several arguments in order.
  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: ToString,
  {
    self.args.extend(args.into_iter().map(|a| a.to_string()));
    self
  }

  pub fn verb(&self) -> &str {
    &self.verb
  }

  pub fn arguments(&self) -> &[String] {
    &self.args
  }

  /// False when the verb or an argument contains CR or LF. Quoting cannot
  /// carry line breaks, so such a command would reach the server as two.
  pub fn is_single_line(&self) -> bool {
    !has_line_break(&self.verb) && !self.args.iter().any(|a| has_line_break(a))
  }

  /// Encode as one newline-terminated protocol line.
  pub fn encode(&self) -> Vec<u8> {
    let mut line = String::with_capacity(self.verb.len() + 16);
    self.write_line(&mut line);
    line.into_bytes()
  }

  fn write_line(&self, out: &mut String) {
    out.push_str(&self.verb);
    for arg in &self.args {
      out.push(' ');
      push_quoted(out, arg);
    }
    out.push('\n');
  }

  // Query commands

  /// Current player status.
  pub fn status() -> Self {
    Self::new("status")
  }

  /// Metadata of the current song.
  pub fn current_song() -> Self {
    Self::new("currentsong")
  }

  /// Database statistics.
  pub fn stats() -> Self {
    Self::new("stats")
  }

  /// Full queue listing.
  pub fn playlist_info() -> Self {
    Self::new("playlistinfo")
  }

  /// Queue entries changed since `version`.
  pub fn playlist_changes(version: u32) -> Self {
    Self::new("plchanges").arg(version)
  }

  /// Unique values of a tag, optionally grouped by other tags.
  pub fn list(tag: &str) -> Self {
    Self::new("list").arg(tag)
  }

  /// Exact-match database query.
  pub fn find(filters: &[(&str, &str)]) -> Self {
    Self::new("find").args(filters.iter().flat_map(|(tag, value)| [*tag, *value]))
  }

  /// Case-insensitive substring database query.
  pub fn search(tag: &str, term: &str) -> Self {
    Self::new("search").arg(tag).arg(term)
  }

  /// Find songs and append them to the queue.
  pub fn find_add(filters: &[(&str, &str)]) -> Self {
    Self::new("findadd").args(filters.iter().flat_map(|(tag, value)| [*tag, *value]))
  }

  /// Directory listing with metadata.
  pub fn list_info(path: &str) -> Self {
    if path.is_empty() {
      Self::new("lsinfo")
    } else {
      Self::new("lsinfo").arg(path)
    }
  }

  /// Audio outputs.
  pub fn outputs() -> Self {
    Self::new("outputs")
  }

  /// Stored playlists.
  pub fn list_playlists() -> Self {
    Self::new("listplaylists")
  }

  /// Songs of a stored playlist.
  pub fn list_playlist_info(name: &str) -> Self {
    Self::new("listplaylistinfo").arg(name)
  }

  /// Commands the current connection may use.
  pub fn commands() -> Self {
    Self::new("commands")
  }

  // Playback commands

  pub fn play() -> Self {
    Self::new("play")
  }

  pub fn play_position(pos: u32) -> Self {
    Self::new("play").arg(pos)
  }

  pub fn play_id(id: u32) -> Self {
    Self::new("playid").arg(id)
  }

  /// Set pause state explicitly.
  pub fn pause(paused: bool) -> Self {
    Self::new("pause").arg(u8::from(paused))
  }

  /// Toggle pause (deprecated form without argument).
  pub fn toggle_pause() -> Self {
    Self::new("pause")
  }

  pub fn stop() -> Self {
    Self::new("stop")
  }

  pub fn next() -> Self {
    Self::new("next")
  }

  pub fn previous() -> Self {
    Self::new("previous")
  }

  /// Seek within the current song, in seconds.
  pub fn seek_current(seconds: f64) -> Self {
    Self::new("seekcur").arg(format!("{:.3}", seconds))
  }

  /// Set volume (0-100).
  pub fn set_volume(volume: u8) -> Self {
    Self::new("setvol").arg(volume.min(100))
  }

  pub fn random(enabled: bool) -> Self {
    Self::new("random").arg(u8::from(enabled))
  }

  pub fn repeat(enabled: bool) -> Self {
    Self::new("repeat").arg(u8::from(enabled))
  }

  /// Set single mode ("0", "1" or "oneshot").
  pub fn single(mode: &str) -> Self {
    Self::new("single").arg(mode)
  }

  pub fn consume(enabled: bool) -> Self {
    Self::new("consume").arg(u8::from(enabled))
  }

  // Queue and playlist commands

  pub fn add(uri: &str) -> Self {
    Self::new("add").arg(uri)
  }

  pub fn clear() -> Self {
    Self::new("clear")
  }

  pub fn delete_id(id: u32) -> Self {
    Self::new("deleteid").arg(id)
  }

  pub fn move_id(id: u32, to: u32) -> Self {
    Self::new("moveid").arg(id).arg(to)
  }

  pub fn load(name: &str) -> Self {
    Self::new("load").arg(name)
  }

  pub fn save(name: &str) -> Self {
    Self::new("save").arg(name)
  }

  pub fn remove_playlist(name: &str) -> Self {
    Self::new("rm").arg(name)
  }

  // Output commands

  pub fn enable_output(id: u32) -> Self {
    Self::new("enableoutput").arg(id)
  }

  pub fn disable_output(id: u32) -> Self {
    Self::new("disableoutput").arg(id)
  }

  pub fn toggle_output(id: u32) -> Self {
    Self::new("toggleoutput").arg(id)
  }

  /// Rescan the music directory (optionally a subpath).
  pub fn update(path: Option<&str>) -> Self {
    match path {
      Some(path) => Self::new("update").arg(path),
      None => Self::new("update"),
    }
  }

  // Connection commands

  pub fn password(password: &str) -> Self {
    Self::new("password").arg(password)
  }

  pub fn ping() -> Self {
    Self::new("ping")
  }

  /// Enter idle mode, optionally restricted to subsystems.
  pub fn idle(subsystems: &[&str]) -> Self {
    Self::new("idle").args(subsystems.iter().copied())
  }

  pub fn no_idle() -> Self {
    Self::new("noidle")
  }

  pub fn close() -> Self {
    Self::new("close")
  }
}

impl fmt::Display for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Never print credentials into logs.
    if self.verb == "password" {
      return f.write_str("password ****");
    }
    let mut line = String::new();
    self.write_line(&mut line);
    f.write_str(line.trim_end())
  }
}

/// Batch of commands executed atomically (`command_list_ok_begin`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandList {
  commands: Vec<Command>,
}

impl CommandList {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(mut self, command: Command) -> Self {
    self.commands.push(command);
    self
  }

  pub fn len(&self) -> usize {
    self.commands.len()
  }

  pub fn is_empty(&self) -> bool {
    self.commands.is_empty()
  }

  pub fn commands(&self) -> &[Command] {
    &self.commands
  }

  /// First command that cannot be sent as a single line.
  pub fn find_multi_line(&self) -> Option<&Command> {
    self.commands.iter().find(|c| !c.is_single_line())
  }

  /// Encode the whole batch as one request block.
  pub fn encode(&self) -> Vec<u8> {
    let mut out = String::from("command_list_ok_begin\n");
    for command in &self.commands {
      command.write_line(&mut out);
    }
    out.push_str("command_list_end\n");
    out.into_bytes()
  }
}

impl FromIterator<Command> for CommandList {
  fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
    Self {
      commands: iter.into_iter().collect(),
    }
  }
}

fn has_line_break(s: &str) -> bool {
  s.contains(['\n', '\r'])
}

fn needs_quoting(arg: &str) -> bool {
  arg.is_empty()
    || arg
      .chars()
      .any(|c| c.is_whitespace() || c == '"' || c == '\\' || c == '\'')
}

fn push_quoted(out: &mut String, arg: &str) {
  if !needs_quoting(arg) {
    out.push_str(arg);
    return;
  }
  out.push('"');
  for c in arg.chars() {
    if c == '"' || c == '\\' {
      out.push('\\');
    }
    out.push(c);
  }
  out.push('"');
}

/// Split a request line into verb and arguments using the protocol's quoting rules.
pub fn split_arguments(line: &str) -> Result<Vec<String>, ProtocolError> {
  let mut tokens = Vec::new();
  let mut chars = line.trim_end_matches(['\r', '\n']).chars().peekable();

  loop {
    while chars.peek().is_some_and(|c| *c == ' ' || *c == '\t') {
      chars.next();
    }
    let Some(&first) = chars.peek() else {
      break;
    };

    let mut token = String::new();
    if first == '"' {
      chars.next();
      let mut closed = false;
      while let Some(c) = chars.next() {
        match c {
          '\\' => match chars.next() {
            Some(escaped) => token.push(escaped),
            None => break,
          },
          '"' => {
            closed = true;
            break;
          }
          other => token.push(other),
        }
      }
      if !closed {
        return Err(ProtocolError::Syntax(format!("unterminated quote in: {}", line.trim_end())));
      }
      if chars.peek().is_some_and(|c| *c != ' ' && *c != '\t') {
        return Err(ProtocolError::Syntax(format!("garbage after quoted argument in: {}", line.trim_end())));
      }
    } else {
      while let Some(&c) = chars.peek() {
        if c == ' ' || c == '\t' {
          break;
        }
        token.push(c);
        chars.next();
      }
    }
    tokens.push(token);
  }

  Ok(tokens)
}
