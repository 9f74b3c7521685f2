//! High-level MPD client with typed command methods.

use crate::connection::Session;
use crate::dispatch::{Dispatcher, SubResult};
use crate::error::{Error, Result};
use crate::model::{
  Album, Artist, DirectoryEntry, Output, PlaybackStatus, ServerStatistics, SingleMode,
  StoredPlaylist, Track,
};
use crate::protocol::{Command, CommandList, ProtocolError, ResponseBlock};

/// Typed facade over a session's dispatcher.
#[derive(Clone)]
pub struct MpdClient {
  session: Session,
  dispatcher: Dispatcher,
}

impl MpdClient {
  pub fn new(session: Session) -> Self {
    let dispatcher = session.dispatcher();
    Self {
      session,
      dispatcher,
    }
  }

  pub fn session(&self) -> &Session {
    &self.session
  }

  pub fn dispatcher(&self) -> &Dispatcher {
    &self.dispatcher
  }

  // Queries

  pub async fn status(&self) -> Result<PlaybackStatus> {
    self.dispatcher.submit(Command::status()).await
  }

  /// The current song, `None` when the queue is empty or stopped.
  pub async fn current_song(&self) -> Result<Option<Track>> {
    self.dispatcher.submit(Command::current_song()).await
  }

  pub async fn stats(&self) -> Result<ServerStatistics> {
    self.dispatcher.submit(Command::stats()).await
  }

  /// The whole queue in order.
  pub async fn queue(&self) -> Result<Vec<Track>> {
    self.dispatcher.submit(Command::playlist_info()).await
  }

  /// Queue entries changed since playlist `version`.
  pub async fn queue_changes(&self, version: u32) -> Result<Vec<Track>> {
    self.dispatcher.submit(Command::playlist_changes(version)).await
  }

  pub async fn artists(&self) -> Result<Vec<Artist>> {
    self.dispatcher.submit(Command::list("artist")).await
  }

  pub async fn album_artists(&self) -> Result<Vec<Artist>> {
    self.dispatcher.submit(Command::list("albumartist")).await
  }

  /// All albums. Grouped by album artist when the server supports it.
  pub async fn albums(&self) -> Result<Vec<Album>> {
    let mut command = Command::list("album");
    if self.supports_grouped_list() {
      command = command.args(["group", "albumartist", "group", "date"]);
    }
    self.dispatcher.submit(command).await
  }

  pub async fn artist_albums(&self, artist: &str) -> Result<Vec<Album>> {
    let mut command = Command::list("album").args(["albumartist", artist]);
    if self.supports_grouped_list() {
      command = command.args(["group", "date"]);
    }
    let mut albums: Vec<Album> = self.dispatcher.submit(command).await?;
    for album in albums.iter_mut().filter(|a| a.artist.is_empty()) {
      album.artist = artist.to_string();
    }
    Ok(albums)
  }

  pub async fn album_tracks(&self, album: &str, artist: Option<&str>) -> Result<Vec<Track>> {
    let command = match artist {
      Some(artist) => Command::find(&[("album", album), ("albumartist", artist)]),
      None => Command::find(&[("album", album)]),
    };
    self.dispatcher.submit(command).await
  }

  /// Case-insensitive substring search on one tag (`any` for all).
  pub async fn search(&self, tag: &str, term: &str) -> Result<Vec<Track>> {
    if term.is_empty() {
      return Err(Error::InvalidArgument("search term is empty".to_string()));
    }
    self.dispatcher.submit(Command::search(tag, term)).await
  }

  pub async fn outputs(&self) -> Result<Vec<Output>> {
    self.dispatcher.submit(Command::outputs()).await
  }

  pub async fn stored_playlists(&self) -> Result<Vec<StoredPlaylist>> {
    self.dispatcher.submit(Command::list_playlists()).await
  }

  pub async fn playlist_tracks(&self, name: &str) -> Result<Vec<Track>> {
    self.dispatcher.submit(Command::list_playlist_info(name)).await
  }

  /// Directory listing. An empty path lists the music root.
  pub async fn browse(&self, path: &str) -> Result<Vec<DirectoryEntry>> {
    self.dispatcher.submit(Command::list_info(path)).await
  }

  /// Commands this connection is permitted to run.
  pub async fn commands(&self) -> Result<Vec<String>> {
    self.dispatcher.submit(Command::commands()).await
  }

  // Playback

  pub async fn play(&self) -> Result<()> {
    self.dispatcher.submit(Command::play()).await
  }

  pub async fn play_position(&self, position: u32) -> Result<()> {
    self.dispatcher.submit(Command::play_position(position)).await
  }

  pub async fn play_id(&self, id: u32) -> Result<()> {
    self.dispatcher.submit(Command::play_id(id)).await
  }

  pub async fn pause(&self, paused: bool) -> Result<()> {
    self.dispatcher.submit(Command::pause(paused)).await
  }

  pub async fn toggle_pause(&self) -> Result<()> {
    self.dispatcher.submit(Command::toggle_pause()).await
  }

  pub async fn stop(&self) -> Result<()> {
    self.dispatcher.submit(Command::stop()).await
  }

  pub async fn next(&self) -> Result<()> {
    self.dispatcher.submit(Command::next()).await
  }

  pub async fn previous(&self) -> Result<()> {
    self.dispatcher.submit(Command::previous()).await
  }

  /// Seek within the current song to an absolute position.
  pub async fn seek_current(&self, seconds: f64) -> Result<()> {
    if !seconds.is_finite() || seconds < 0.0 {
      return Err(Error::InvalidArgument(format!("invalid seek position {}", seconds)));
    }
    self.dispatcher.submit(Command::seek_current(seconds)).await
  }

  pub async fn set_volume(&self, volume: u8) -> Result<()> {
    if volume > 100 {
      return Err(Error::InvalidArgument(format!("volume {} out of range 0-100", volume)));
    }
    self.dispatcher.submit(Command::set_volume(volume)).await
  }

  pub async fn set_random(&self, enabled: bool) -> Result<()> {
    self.dispatcher.submit(Command::random(enabled)).await
  }

  pub async fn set_repeat(&self, enabled: bool) -> Result<()> {
    self.dispatcher.submit(Command::repeat(enabled)).await
  }

  pub async fn set_single(&self, mode: SingleMode) -> Result<()> {
    self.dispatcher.submit(Command::single(mode.as_arg())).await
  }

  pub async fn set_consume(&self, enabled: bool) -> Result<()> {
    self.dispatcher.submit(Command::consume(enabled)).await
  }

  // Queue and stored playlists

  pub async fn add(&self, uri: &str) -> Result<()> {
    self.dispatcher.submit(Command::add(uri)).await
  }

  /// Append every track of an album to the queue.
  pub async fn add_album(&self, album: &str, artist: Option<&str>) -> Result<()> {
    let command = match artist {
      Some(artist) => Command::find_add(&[("album", album), ("albumartist", artist)]),
      None => Command::find_add(&[("album", album)]),
    };
    self.dispatcher.submit(command).await
  }

  pub async fn clear(&self) -> Result<()> {
    self.dispatcher.submit(Command::clear()).await
  }

  pub async fn delete_id(&self, id: u32) -> Result<()> {
    self.dispatcher.submit(Command::delete_id(id)).await
  }

  pub async fn move_id(&self, id: u32, to: u32) -> Result<()> {
    self.dispatcher.submit(Command::move_id(id, to)).await
  }

  /// Replace the queue with a stored playlist and start playing it.
  pub async fn replace_with_playlist(&self, name: &str) -> Result<()> {
    let list = CommandList::new()
      .push(Command::clear())
      .push(Command::load(name))
      .push(Command::play());
    first_failure(self.dispatcher.submit_batch(list).await?)
  }

  pub async fn load_playlist(&self, name: &str) -> Result<()> {
    self.dispatcher.submit(Command::load(name)).await
  }

  pub async fn save_playlist(&self, name: &str) -> Result<()> {
    self.dispatcher.submit(Command::save(name)).await
  }

  pub async fn remove_playlist(&self, name: &str) -> Result<()> {
    self.dispatcher.submit(Command::remove_playlist(name)).await
  }

  // Outputs

  pub async fn enable_output(&self, id: u32) -> Result<()> {
    self.dispatcher.submit(Command::enable_output(id)).await
  }

  pub async fn disable_output(&self, id: u32) -> Result<()> {
    self.dispatcher.submit(Command::disable_output(id)).await
  }

  pub async fn toggle_output(&self, id: u32) -> Result<()> {
    self.dispatcher.submit(Command::toggle_output(id)).await
  }

  // Database

  /// Start a database rescan. Returns the server's update job id.
  pub async fn update_database(&self, path: Option<&str>) -> Result<u32> {
    let block: ResponseBlock = self.dispatcher.submit(Command::update(path)).await?;
    block
      .get("updating_db")
      .and_then(|id| id.parse().ok())
      .ok_or_else(|| ProtocolError::Syntax("update reply without updating_db".to_string()).into())
  }

  fn supports_grouped_list(&self) -> bool {
    self
      .session
      .capabilities()
      .is_some_and(|caps| caps.grouped_list)
  }
}

/// Collapse a batch into its first failure, if any.
fn first_failure(results: Vec<SubResult>) -> Result<()> {
  for result in results {
    match result {
      SubResult::Completed(_) => {}
      SubResult::Failed(ack) => return Err(Error::Server(ack)),
      SubResult::Skipped => break,
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ClientConfig;
  use crate::protocol::{AckError, Terminator};

  #[test]
  fn test_first_failure() {
    let done = SubResult::Completed(ResponseBlock::new(Vec::new(), Terminator::ListOk));
    assert!(first_failure(vec![done.clone(), done.clone()]).is_ok());

    let ack = AckError::parse("ACK [50@1] {load} No such playlist").unwrap();
    let err = first_failure(vec![done, SubResult::Failed(ack), SubResult::Skipped]).unwrap_err();
    assert!(matches!(err, Error::Server(ack) if ack.command == "load"));
  }

  #[tokio::test]
  async fn test_argument_validation_before_network() {
    let client = MpdClient::new(Session::new(ClientConfig::default()));
    assert!(matches!(client.set_volume(150).await, Err(Error::InvalidArgument(_))));
    assert!(matches!(client.seek_current(-1.0).await, Err(Error::InvalidArgument(_))));
    assert!(matches!(client.search("any", "").await, Err(Error::InvalidArgument(_))));
    assert!(matches!(client.set_volume(50).await, Err(Error::NotConnected)));
  }
}
