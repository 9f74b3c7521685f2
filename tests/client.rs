//! Typed queries through `MpdClient`.

mod support;

use mpd_link::model::{DirectoryEntry, PlayState, SingleMode};
use mpd_link::{Error, MpdClient, Session};
use support::{init_logging, test_config, within, MockMpd};

async fn client(server: &MockMpd) -> MpdClient {
  init_logging();
  let session = Session::new(test_config());
  within(session.connect(server.profile())).await.unwrap();
  MpdClient::new(session)
}

#[tokio::test]
async fn test_status_and_current_song() {
  let server = MockMpd::start().await;
  server.respond(
    "status",
    "volume: 65\nrepeat: 1\nrandom: 0\nsingle: oneshot\nconsume: 0\nplaylist: 7\n\
     playlistlength: 2\nstate: play\nsong: 1\nsongid: 12\nelapsed: 31.250\n\
     duration: 200.5\nbitrate: 320\naudio: 44100:16:2\n",
  );
  server.respond(
    "currentsong",
    "file: rock/a.flac\nTitle: Song A\nArtist: Band\nAlbum: First\nTrack: 3/12\n\
     duration: 200.5\nPos: 1\nId: 12\n",
  );
  let client = client(&server).await;

  let status = within(client.status()).await.unwrap();
  assert_eq!(status.volume, Some(65));
  assert!(status.repeat);
  assert_eq!(status.single, SingleMode::Oneshot);
  assert_eq!(status.state, PlayState::Play);
  assert_eq!(status.song_id, Some(12));
  assert_eq!(status.audio.map(|a| a.sample_rate), Some(44_100));

  let song = within(client.current_song()).await.unwrap().unwrap();
  assert_eq!(song.title, "Song A");
  assert_eq!(song.track_number, 3);
  assert_eq!(song.position, Some(1));

  client.session().disconnect().await;
}

#[tokio::test]
async fn test_current_song_empty() {
  let server = MockMpd::start().await;
  let client = client(&server).await;
  assert!(within(client.current_song()).await.unwrap().is_none());
  client.session().disconnect().await;
}

#[tokio::test]
async fn test_queue_and_browse() {
  let server = MockMpd::start().await;
  server.respond(
    "playlistinfo",
    "file: a.mp3\nTitle: A\nPos: 0\nId: 1\nfile: b.mp3\nTitle: B\nTime: 61\nPos: 1\nId: 2\n",
  );
  server.respond(
    "lsinfo",
    "directory: rock\nLast-Modified: 2024-01-01T00:00:00Z\nfile: c.ogg\nTitle: C\n\
     playlist: mix\n",
  );
  let client = client(&server).await;

  let queue = within(client.queue()).await.unwrap();
  assert_eq!(queue.len(), 2);
  assert_eq!(queue[1].title, "B");
  assert_eq!(queue[1].duration, 61.0);

  let entries = within(client.browse("")).await.unwrap();
  assert_eq!(entries.len(), 3);
  assert!(matches!(&entries[0], DirectoryEntry::Directory { path, .. } if path == "rock"));
  assert!(matches!(&entries[1], DirectoryEntry::File(track) if track.title == "C"));
  assert!(matches!(&entries[2], DirectoryEntry::Playlist(p) if p.name == "mix"));

  client.session().disconnect().await;
}

#[tokio::test]
async fn test_grouped_albums() {
  let server = MockMpd::start().await;
  server.respond(
    "list album group albumartist group date",
    "AlbumArtist: Band\nDate: 1999\nAlbum: First\nAlbum: Second\nAlbumArtist: Other\nDate: 2004\nAlbum: Third\n",
  );
  let client = client(&server).await;

  let albums = within(client.albums()).await.unwrap();
  assert_eq!(albums.len(), 3);
  assert_eq!((albums[1].name.as_str(), albums[1].artist.as_str()), ("Second", "Band"));
  assert_eq!((albums[2].artist.as_str(), albums[2].date.as_str()), ("Other", "2004"));

  client.session().disconnect().await;
}

#[tokio::test]
async fn test_artist_albums_fill_in_artist() {
  let server = MockMpd::start().await;
  server.respond("list", "Date: 2001\nAlbum: Solo\n");
  let client = client(&server).await;

  let albums = within(client.artist_albums("Band Name")).await.unwrap();
  assert_eq!(albums.len(), 1);
  assert_eq!(albums[0].artist, "Band Name");
  assert!(server
    .received()
    .contains(&"list album albumartist \"Band Name\" group date".to_string()));

  client.session().disconnect().await;
}

#[tokio::test]
async fn test_outputs_and_toggle() {
  let server = MockMpd::start().await;
  server.respond(
    "outputs",
    "outputid: 0\noutputname: Speakers\nplugin: alsa\noutputenabled: 1\n\
     outputid: 1\noutputname: Stream\nplugin: httpd\noutputenabled: 0\n",
  );
  let client = client(&server).await;

  let outputs = within(client.outputs()).await.unwrap();
  assert_eq!(outputs.len(), 2);
  assert!(outputs[0].enabled);
  assert!(!outputs[1].enabled);
  assert_eq!(outputs[1].plugin, "httpd");

  within(client.toggle_output(1)).await.unwrap();
  server.wait_for("toggleoutput 1", 1).await;
  client.session().disconnect().await;
}

#[tokio::test]
async fn test_update_database_returns_job_id() {
  let server = MockMpd::start().await;
  server.respond("update", "updating_db: 42\n");
  let client = client(&server).await;

  assert_eq!(within(client.update_database(Some("new music"))).await.unwrap(), 42);
  assert!(server.received().contains(&"update \"new music\"".to_string()));

  server.respond("update", "");
  assert!(matches!(
    within(client.update_database(None)).await,
    Err(Error::Protocol(_))
  ));
  client.session().disconnect().await;
}

#[tokio::test]
async fn test_playback_commands_on_the_wire() {
  let server = MockMpd::start().await;
  let client = client(&server).await;

  within(client.play_position(3)).await.unwrap();
  within(client.set_volume(40)).await.unwrap();
  within(client.set_single(SingleMode::On)).await.unwrap();
  within(client.add("music/some song.flac")).await.unwrap();
  within(client.replace_with_playlist("evening")).await.unwrap();

  let received = server.received();
  for line in [
    "play 3",
    "setvol 40",
    "single 1",
    "add \"music/some song.flac\"",
    "command_list_ok_begin",
    "load evening",
    "command_list_end",
  ] {
    assert!(received.contains(&line.to_string()), "missing {:?} in {:?}", line, received);
  }
  client.session().disconnect().await;
}

#[tokio::test]
async fn test_stored_playlist_missing() {
  let server = MockMpd::start().await;
  server.fail("listplaylistinfo", 50, "No such playlist");
  let client = client(&server).await;

  match within(client.playlist_tracks("nope")).await {
    Err(Error::Server(ack)) => assert_eq!(ack.kind(), mpd_link::protocol::AckCode::NoExist),
    other => panic!("unexpected {:?}", other),
  }
  client.session().disconnect().await;
}
