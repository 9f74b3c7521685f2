//! Domain entities built from server responses.
//!
//! These are plain records. The server omits empty or unknown fields, so
//! every field has a default: empty strings, `0` for unknown numbers and
//! `None` where a missing value carries meaning.

use std::fmt;

use serde::Serialize;

/// A song, either in the database or in the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Track {
  /// Database URI or stream URL.
  pub file: String,
  pub title: String,
  pub artist: String,
  pub album_artist: String,
  pub album: String,
  pub genre: String,
  pub date: String,
  /// Stream name, sent for radio streams instead of a title.
  pub name: String,
  pub track_number: u32,
  pub disc_number: u32,
  /// Length in seconds, 0 when unknown.
  pub duration: f64,
  /// Queue position, only for queue entries.
  pub position: Option<u32>,
  /// Queue song id, only for queue entries.
  pub id: Option<u32>,
  pub last_modified: Option<String>,
  pub musicbrainz_track_id: Option<String>,
  pub musicbrainz_album_id: Option<String>,
  pub musicbrainz_artist_id: Option<String>,
}

impl Track {
  /// Best label for display: title, then stream name, then file name.
  pub fn display_title(&self) -> &str {
    if !self.title.is_empty() {
      &self.title
    } else if !self.name.is_empty() {
      &self.name
    } else {
      self.file.rsplit('/').next().unwrap_or(&self.file)
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Artist {
  pub name: String,
  pub musicbrainz_id: Option<String>,
}

/// Album, keyed by name plus artist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Album {
  pub name: String,
  pub artist: String,
  pub date: String,
  pub musicbrainz_id: Option<String>,
}

/// Audio output, keyed by its server-assigned id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Output {
  pub id: u32,
  pub name: String,
  pub plugin: String,
  pub enabled: bool,
  pub attributes: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
  Play,
  Pause,
  #[default]
  Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SingleMode {
  #[default]
  Off,
  On,
  Oneshot,
}

impl SingleMode {
  /// Argument for the `single` command.
  pub fn as_arg(&self) -> &'static str {
    match self {
      SingleMode::Off => "0",
      SingleMode::On => "1",
      SingleMode::Oneshot => "oneshot",
    }
  }
}

/// Decoder output format, `samplerate:bits:channels`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AudioFormat {
  pub sample_rate: u32,
  /// Bit depth, or `f` for float and `dsd` for DSD passthrough.
  pub bits: String,
  pub channels: u32,
}

/// Player state as reported by `status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackStatus {
  /// `None` when the server has no mixer.
  pub volume: Option<u8>,
  pub repeat: bool,
  pub random: bool,
  pub single: SingleMode,
  pub consume: bool,
  pub playlist_version: u32,
  pub playlist_length: u32,
  pub state: PlayState,
  pub song_position: Option<u32>,
  pub song_id: Option<u32>,
  pub next_song_position: Option<u32>,
  pub next_song_id: Option<u32>,
  /// Seconds into the current song.
  pub elapsed: f64,
  /// Length of the current song in seconds, 0 when unknown.
  pub duration: f64,
  /// Instantaneous bitrate in kbit/s.
  pub bitrate: u32,
  pub crossfade: u32,
  pub audio: Option<AudioFormat>,
  /// Running database update job.
  pub updating_db: Option<u32>,
  pub error: Option<String>,
  pub partition: Option<String>,
}

/// Database statistics from `stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStatistics {
  pub artists: u32,
  pub albums: u32,
  pub songs: u32,
  pub uptime: u64,
  pub playtime: u64,
  pub db_playtime: u64,
  /// Unix timestamp of the last database update.
  pub db_update: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoredPlaylist {
  pub name: String,
  pub last_modified: Option<String>,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DirectoryEntry {
  Directory {
    path: String,
    last_modified: Option<String>,
  },
  File(Track),
  Playlist(StoredPlaylist),
}

/// Server subsystem reported as changed by `idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
  Database,
  /// Database update job started or finished.
  Update,
  StoredPlaylist,
  /// The queue.
  Playlist,
  Player,
  /// Volume.
  Mixer,
  Output,
  Options,
  Partition,
  Sticker,
  Subscription,
  Message,
  Neighbor,
  Mount,
}

impl ChangeKind {
  pub fn parse(name: &str) -> Option<Self> {
    let kind = match name {
      "database" => ChangeKind::Database,
      "update" => ChangeKind::Update,
      "stored_playlist" => ChangeKind::StoredPlaylist,
      "playlist" => ChangeKind::Playlist,
      "player" => ChangeKind::Player,
      "mixer" => ChangeKind::Mixer,
      "output" => ChangeKind::Output,
      "options" => ChangeKind::Options,
      "partition" => ChangeKind::Partition,
      "sticker" => ChangeKind::Sticker,
      "subscription" => ChangeKind::Subscription,
      "message" => ChangeKind::Message,
      "neighbor" => ChangeKind::Neighbor,
      "mount" => ChangeKind::Mount,
      _ => return None,
    };
    Some(kind)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ChangeKind::Database => "database",
      ChangeKind::Update => "update",
      ChangeKind::StoredPlaylist => "stored_playlist",
      ChangeKind::Playlist => "playlist",
      ChangeKind::Player => "player",
      ChangeKind::Mixer => "mixer",
      ChangeKind::Output => "output",
      ChangeKind::Options => "options",
      ChangeKind::Partition => "partition",
      ChangeKind::Sticker => "sticker",
      ChangeKind::Subscription => "subscription",
      ChangeKind::Message => "message",
      ChangeKind::Neighbor => "neighbor",
      ChangeKind::Mount => "mount",
    }
  }
}

impl fmt::Display for ChangeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_display_title_fallbacks() {
    let mut track = Track {
      file: "Jazz/Miles Davis/So What.flac".to_string(),
      ..Default::default()
    };
    assert_eq!(track.display_title(), "So What.flac");
    track.name = "Radio".to_string();
    assert_eq!(track.display_title(), "Radio");
    track.title = "So What".to_string();
    assert_eq!(track.display_title(), "So What");
  }

  #[test]
  fn test_change_kind_names() {
    for name in ["playlist", "player", "mixer", "output", "options", "database", "stored_playlist", "update"] {
      let kind = ChangeKind::parse(name).unwrap();
      assert_eq!(kind.as_str(), name);
    }
    assert_eq!(ChangeKind::parse("bogus"), None);
  }
}
