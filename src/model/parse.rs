//! Mapping of decoded key/value blocks onto domain entities.
//!
//! List responses are a flat sequence of pairs. Records are delimited by a
//! sentinel rule: a leading key (`file`, `outputid`, ...) showing up again
//! starts the next record. Builders never fail on a single bad field: unknown
//! keys are skipped and malformed numbers fall back to their default.

use std::str::FromStr;

use crate::error::Error;
use crate::protocol::ResponseBlock;

use super::types::*;

type Pair = (String, String);

/// Leading keys of a directory listing.
const ENTRY_KEYS: &[&str] = &["file", "directory", "playlist"];

/// Split `pairs` into records, starting a new one at every leading key.
pub fn group_records<'a>(pairs: &'a [Pair], leading_keys: &[&str]) -> Vec<&'a [Pair]> {
  let mut records = Vec::new();
  let mut start = 0;
  for (i, (key, _)) in pairs.iter().enumerate() {
    if i > start && leading_keys.contains(&key.as_str()) {
      records.push(&pairs[start..i]);
      start = i;
    }
  }
  if start < pairs.len() {
    records.push(&pairs[start..]);
  }
  records
}

fn number<T: FromStr + Default>(key: &str, value: &str) -> T {
  value.trim().parse().unwrap_or_else(|_| {
    log::debug!("Ignoring malformed numeric field {}={:?}", key, value);
    T::default()
  })
}

fn optional_number<T: FromStr>(key: &str, value: &str) -> Option<T> {
  let parsed = value.trim().parse().ok();
  if parsed.is_none() {
    log::debug!("Ignoring malformed numeric field {}={:?}", key, value);
  }
  parsed
}

/// Track and disc numbers come as `3` or `3/12`.
fn leading_number(key: &str, value: &str) -> u32 {
  let head = value.split('/').next().unwrap_or(value);
  number(key, head)
}

fn flag(value: &str) -> bool {
  value.trim() == "1"
}

fn non_empty(value: &str) -> Option<String> {
  if value.is_empty() {
    None
  } else {
    Some(value.to_string())
  }
}

impl Track {
  /// Build a track from one record. Unknown keys are ignored.
  pub fn from_pairs(pairs: &[Pair]) -> Self {
    let mut track = Track::default();
    let mut time = None;
    let mut duration = None;

    for (key, value) in pairs {
      match key.as_str() {
        "file" => track.file = value.clone(),
        "Title" if track.title.is_empty() => track.title = value.clone(),
        "Artist" if track.artist.is_empty() => track.artist = value.clone(),
        "AlbumArtist" if track.album_artist.is_empty() => track.album_artist = value.clone(),
        "Album" if track.album.is_empty() => track.album = value.clone(),
        "Genre" if track.genre.is_empty() => track.genre = value.clone(),
        "Date" => track.date = value.clone(),
        "Name" => track.name = value.clone(),
        "Track" => track.track_number = leading_number(key, value),
        "Disc" => track.disc_number = leading_number(key, value),
        "Time" => time = Some(number::<f64>(key, value)),
        "duration" => duration = optional_number::<f64>(key, value),
        "Pos" => track.position = optional_number(key, value),
        "Id" => track.id = optional_number(key, value),
        "Last-Modified" => track.last_modified = non_empty(value),
        "MUSICBRAINZ_TRACKID" => track.musicbrainz_track_id = non_empty(value),
        "MUSICBRAINZ_ALBUMID" => track.musicbrainz_album_id = non_empty(value),
        "MUSICBRAINZ_ARTISTID" => track.musicbrainz_artist_id = non_empty(value),
        _ => {}
      }
    }

    // `duration` has sub-second precision; `Time` is the legacy integer form.
    track.duration = duration.or(time).unwrap_or(0.0);
    track
  }
}

impl Output {
  pub fn from_pairs(pairs: &[Pair]) -> Self {
    let mut output = Output::default();
    for (key, value) in pairs {
      match key.as_str() {
        "outputid" => output.id = number(key, value),
        "outputname" => output.name = value.clone(),
        "plugin" => output.plugin = value.clone(),
        "outputenabled" => output.enabled = flag(value),
        "attribute" => {
          let (name, attr) = value.split_once('=').unwrap_or((value.as_str(), ""));
          output.attributes.push((name.to_string(), attr.to_string()));
        }
        _ => {}
      }
    }
    output
  }
}

impl AudioFormat {
  /// Parse `44100:24:2`. Returns `None` for anything else.
  pub fn parse(value: &str) -> Option<Self> {
    let mut parts = value.split(':');
    let sample_rate = parts.next()?.parse().ok()?;
    let bits = parts.next()?.to_string();
    let channels = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
      return None;
    }
    Some(Self {
      sample_rate,
      bits,
      channels,
    })
  }
}

impl PlaybackStatus {
  pub fn from_pairs(pairs: &[Pair]) -> Self {
    let mut status = PlaybackStatus::default();
    let mut legacy_time = None;
    let mut elapsed = None;
    let mut duration = None;

    for (key, value) in pairs {
      match key.as_str() {
        "volume" => {
          status.volume = optional_number::<i32>(key, value)
            .filter(|v| *v >= 0)
            .map(|v| v.min(100) as u8)
        }
        "repeat" => status.repeat = flag(value),
        "random" => status.random = flag(value),
        "single" => {
          status.single = match value.as_str() {
            "1" => SingleMode::On,
            "oneshot" => SingleMode::Oneshot,
            _ => SingleMode::Off,
          }
        }
        "consume" => status.consume = flag(value),
        "playlist" => status.playlist_version = number(key, value),
        "playlistlength" => status.playlist_length = number(key, value),
        "state" => {
          status.state = match value.as_str() {
            "play" => PlayState::Play,
            "pause" => PlayState::Pause,
            _ => PlayState::Stop,
          }
        }
        "song" => status.song_position = optional_number(key, value),
        "songid" => status.song_id = optional_number(key, value),
        "nextsong" => status.next_song_position = optional_number(key, value),
        "nextsongid" => status.next_song_id = optional_number(key, value),
        "time" => legacy_time = value.split_once(':').map(|(e, t)| (e.to_string(), t.to_string())),
        "elapsed" => elapsed = optional_number::<f64>(key, value),
        "duration" => duration = optional_number::<f64>(key, value),
        "bitrate" => status.bitrate = number(key, value),
        "xfade" => status.crossfade = number(key, value),
        "audio" => status.audio = AudioFormat::parse(value),
        "updating_db" => status.updating_db = optional_number(key, value),
        "error" => status.error = non_empty(value),
        "partition" => status.partition = non_empty(value),
        _ => {}
      }
    }

    let (legacy_elapsed, legacy_total) = match legacy_time {
      Some((e, t)) => (optional_number::<f64>("time", &e), optional_number::<f64>("time", &t)),
      None => (None, None),
    };
    status.elapsed = elapsed.or(legacy_elapsed).unwrap_or(0.0);
    status.duration = duration.or(legacy_total).unwrap_or(0.0);
    status
  }
}

impl ServerStatistics {
  pub fn from_pairs(pairs: &[Pair]) -> Self {
    let mut stats = ServerStatistics::default();
    for (key, value) in pairs {
      match key.as_str() {
        "artists" => stats.artists = number(key, value),
        "albums" => stats.albums = number(key, value),
        "songs" => stats.songs = number(key, value),
        "uptime" => stats.uptime = number(key, value),
        "playtime" => stats.playtime = number(key, value),
        "db_playtime" => stats.db_playtime = number(key, value),
        "db_update" => stats.db_update = number(key, value),
        _ => {}
      }
    }
    stats
  }
}

impl StoredPlaylist {
  pub fn from_pairs(pairs: &[Pair]) -> Self {
    let mut playlist = StoredPlaylist::default();
    for (key, value) in pairs {
      match key.as_str() {
        "playlist" => playlist.name = value.clone(),
        "Last-Modified" => playlist.last_modified = non_empty(value),
        _ => {}
      }
    }
    playlist
  }
}

impl DirectoryEntry {
  /// Build an entry from one record; `None` if no leading key is present.
  pub fn from_pairs(pairs: &[Pair]) -> Option<Self> {
    let (key, value) = pairs.first()?;
    match key.as_str() {
      "file" => Some(DirectoryEntry::File(Track::from_pairs(pairs))),
      "playlist" => Some(DirectoryEntry::Playlist(StoredPlaylist::from_pairs(pairs))),
      "directory" => Some(DirectoryEntry::Directory {
        path: value.clone(),
        last_modified: pairs
          .iter()
          .find(|(k, _)| k == "Last-Modified")
          .and_then(|(_, v)| non_empty(v)),
      }),
      _ => None,
    }
  }
}

/// Parse `list artist` / `list albumartist` output, optionally grouped by MBID.
pub fn parse_artists(pairs: &[Pair]) -> Vec<Artist> {
  let mut artists = Vec::new();
  let mut mbid = None;
  for (key, value) in pairs {
    match key.as_str() {
      "MUSICBRAINZ_ARTISTID" | "MUSICBRAINZ_ALBUMARTISTID" => mbid = non_empty(value),
      "Artist" | "AlbumArtist" | "ArtistSort" | "AlbumArtistSort" => artists.push(Artist {
        name: value.clone(),
        musicbrainz_id: mbid.clone(),
      }),
      _ => {}
    }
  }
  artists
}

/// Parse `list album` output.
///
/// With `group` clauses the server sends a group header (`AlbumArtist`,
/// `Date`, ...) whenever the group value changes, followed by the albums in
/// that group. Headers stay in effect until replaced.
pub fn parse_albums(pairs: &[Pair]) -> Vec<Album> {
  let mut albums = Vec::new();
  let mut artist = String::new();
  let mut date = String::new();
  let mut mbid = None;

  for (key, value) in pairs {
    match key.as_str() {
      "AlbumArtist" | "Artist" => artist = value.clone(),
      "Date" => date = value.clone(),
      "MUSICBRAINZ_ALBUMID" => mbid = non_empty(value),
      "Album" => albums.push(Album {
        name: value.clone(),
        artist: artist.clone(),
        date: date.clone(),
        musicbrainz_id: mbid.clone(),
      }),
      _ => {}
    }
  }
  albums
}

/// Parse the subsystems of an `idle` response, skipping unknown names.
pub fn parse_changes(pairs: &[Pair]) -> Vec<ChangeKind> {
  pairs
    .iter()
    .filter(|(key, _)| key == "changed")
    .filter_map(|(_, value)| {
      let kind = ChangeKind::parse(value);
      if kind.is_none() {
        log::debug!("Ignoring unknown idle subsystem: {}", value);
      }
      kind
    })
    .collect()
}

/// Conversion of a successful response block into a typed result.
///
/// The target type encodes the expected shape: `()` for no payload, a record
/// type for a single block, `Vec<T>` for lists.
pub trait FromResponse: Sized {
  fn from_response(block: ResponseBlock) -> Result<Self, Error>;
}

impl FromResponse for () {
  fn from_response(_block: ResponseBlock) -> Result<Self, Error> {
    Ok(())
  }
}

impl FromResponse for ResponseBlock {
  fn from_response(block: ResponseBlock) -> Result<Self, Error> {
    Ok(block)
  }
}

impl FromResponse for PlaybackStatus {
  fn from_response(block: ResponseBlock) -> Result<Self, Error> {
    Ok(PlaybackStatus::from_pairs(block.pairs()))
  }
}

impl FromResponse for ServerStatistics {
  fn from_response(block: ResponseBlock) -> Result<Self, Error> {
    Ok(ServerStatistics::from_pairs(block.pairs()))
  }
}

/// `currentsong`: empty when nothing is queued.
impl FromResponse for Option<Track> {
  fn from_response(block: ResponseBlock) -> Result<Self, Error> {
    if block.is_empty() {
      Ok(None)
    } else {
      Ok(Some(Track::from_pairs(block.pairs())))
    }
  }
}

impl FromResponse for Vec<Track> {
  fn from_response(block: ResponseBlock) -> Result<Self, Error> {
    Ok(
      group_records(block.pairs(), &["file"])
        .into_iter()
        .map(Track::from_pairs)
        .collect(),
    )
  }
}

impl FromResponse for Vec<Artist> {
  fn from_response(block: ResponseBlock) -> Result<Self, Error> {
    Ok(parse_artists(block.pairs()))
  }
}

impl FromResponse for Vec<Album> {
  fn from_response(block: ResponseBlock) -> Result<Self, Error> {
    Ok(parse_albums(block.pairs()))
  }
}

impl FromResponse for Vec<Output> {
  fn from_response(block: ResponseBlock) -> Result<Self, Error> {
    Ok(
      group_records(block.pairs(), &["outputid"])
        .into_iter()
        .map(Output::from_pairs)
        .collect(),
    )
  }
}

impl FromResponse for Vec<StoredPlaylist> {
  fn from_response(block: ResponseBlock) -> Result<Self, Error> {
    Ok(
      group_records(block.pairs(), &["playlist"])
        .into_iter()
        .map(StoredPlaylist::from_pairs)
        .collect(),
    )
  }
}

impl FromResponse for Vec<DirectoryEntry> {
  fn from_response(block: ResponseBlock) -> Result<Self, Error> {
    Ok(
      group_records(block.pairs(), ENTRY_KEYS)
        .into_iter()
        .filter_map(DirectoryEntry::from_pairs)
        .collect(),
    )
  }
}

impl FromResponse for Vec<ChangeKind> {
  fn from_response(block: ResponseBlock) -> Result<Self, Error> {
    Ok(parse_changes(block.pairs()))
  }
}

/// All values in order, regardless of key (`commands`, plain `list`).
impl FromResponse for Vec<String> {
  fn from_response(block: ResponseBlock) -> Result<Self, Error> {
    Ok(block.into_pairs().into_iter().map(|(_, v)| v).collect())
  }
}
