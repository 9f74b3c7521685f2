//! Connection lifecycle against the mock server.

mod support;

use std::sync::Arc;
use std::time::Duration;

use mpd_link::{
  ConnectionState, Error, ExecutionContext, MpdClient, ServerVersion, Session,
};
use support::{init_logging, test_config, wait_until, within, MockMpd, Recorder};

use ConnectionState::*;

fn session_with_recorder() -> (Session, Arc<Recorder>) {
  let session = Session::new(test_config());
  let recorder = Arc::new(Recorder::default());
  session.hub().subscribe(recorder.clone(), ExecutionContext::Inline);
  (session, recorder)
}

#[tokio::test]
async fn test_commands_fail_fast_when_never_connected() {
  init_logging();
  let server = MockMpd::start().await;
  let (session, recorder) = session_with_recorder();
  let client = MpdClient::new(session.clone());

  let err = client.status().await.unwrap_err();
  assert!(matches!(err, Error::NotConnected));
  assert!(session.dispatcher().send(mpd_link::Command::next()).is_err());

  assert_eq!(server.connections(), 0);
  assert!(recorder.states().is_empty());
  assert_eq!(session.state(), Disconnected);
}

#[tokio::test]
async fn test_connect_and_disconnect() {
  init_logging();
  let server = MockMpd::start().await;
  let (session, recorder) = session_with_recorder();

  within(session.connect(server.profile())).await.unwrap();
  assert_eq!(session.state(), Connected);
  assert_eq!(session.server_version(), Some(ServerVersion::new(0, 23, 5)));
  let caps = session.capabilities().unwrap();
  assert!(caps.idle && caps.command_lists);
  assert_eq!(session.profile().map(|p| p.port), Some(server.addr().port()));

  server.wait_for("idle", 1).await;
  assert!(matches!(session.connect(server.profile()).await, Err(Error::AlreadyConnected)));

  within(session.disconnect()).await;
  assert_eq!(session.state(), Disconnected);
  server.wait_for("close", 1).await;
  assert_eq!(server.received(), vec!["idle", "noidle", "close"]);
  assert_eq!(recorder.states(), vec![Connecting, Connected, Disconnected]);
  assert!(session.capabilities().is_none());

  // Disconnecting again publishes nothing.
  within(session.disconnect()).await;
  assert_eq!(recorder.states().len(), 3);
}

#[tokio::test]
async fn test_reset_during_idle_reconnects() {
  init_logging();
  let server = MockMpd::start().await;
  let (session, recorder) = session_with_recorder();

  within(session.connect(server.profile())).await.unwrap();
  server.wait_for("idle", 1).await;

  server.reset_connections();

  let reconnected = wait_until(Duration::from_secs(5), || recorder.states().len() >= 6).await;
  assert!(reconnected, "states: {:?}", recorder.states());
  assert_eq!(
    recorder.states(),
    vec![Connecting, Connected, ConnectionError, Disconnected, Connecting, Connected]
  );
  assert_eq!(server.connections(), 2);

  // The new link serves commands.
  server.wait_for("idle", 2).await;
  let client = MpdClient::new(session.clone());
  assert!(within(client.status()).await.is_ok());

  within(session.disconnect()).await;
}

#[tokio::test]
async fn test_failed_initial_connect_keeps_retrying() {
  init_logging();
  let server = MockMpd::start().await;
  server.set_accepting(false);
  let (session, recorder) = session_with_recorder();

  let err = within(session.connect(server.profile())).await.unwrap_err();
  assert!(err.is_connection_failure(), "{:?}", err);
  assert_eq!(session.state(), Disconnected);

  assert!(wait_until(Duration::from_secs(5), || server.connections() >= 3).await);
  server.set_accepting(true);

  let mut states = session.watch_state();
  within(states.wait_for(|s| *s == Connected)).await.unwrap();
  assert_eq!(&recorder.states()[..3], &[Connecting, ConnectionError, Disconnected]);

  within(session.disconnect()).await;
}

#[tokio::test]
async fn test_disconnect_cancels_pending_reconnect() {
  init_logging();
  let server = MockMpd::start().await;
  server.set_accepting(false);
  let (session, _recorder) = session_with_recorder();

  assert!(within(session.connect(server.profile())).await.is_err());
  within(session.disconnect()).await;
  let attempts = server.connections();

  server.set_accepting(true);
  tokio::time::sleep(Duration::from_millis(400)).await;
  assert_eq!(server.connections(), attempts);
  assert_eq!(session.state(), Disconnected);
  assert!(session.profile().is_none());
}

#[tokio::test]
async fn test_stale_attempt_does_not_clobber_newer_connect() {
  init_logging();
  // The first server answers late with garbage, the second late but properly.
  let first = MockMpd::start().await;
  first.set_greeting_delay(Duration::from_millis(300));
  first.set_greeting("HELLO");
  let second = MockMpd::start().await;
  second.set_greeting_delay(Duration::from_millis(500));
  let (session, recorder) = session_with_recorder();

  let stale = {
    let session = session.clone();
    let profile = first.profile();
    tokio::spawn(async move { session.connect(profile).await })
  };
  assert!(wait_until(Duration::from_secs(5), || first.connections() == 1).await);
  within(session.disconnect()).await;

  within(session.connect(second.profile())).await.unwrap();
  assert!(within(stale).await.unwrap().is_err());

  tokio::time::sleep(Duration::from_millis(200)).await;
  assert_eq!(session.state(), Connected);
  assert_eq!(session.profile().map(|p| p.port), Some(second.addr().port()));
  assert_eq!(
    recorder.states(),
    vec![Connecting, Disconnected, Connecting, Connected]
  );
  assert_eq!(first.connections(), 1);

  let client = MpdClient::new(session.clone());
  assert!(within(client.status()).await.is_ok());
  within(session.disconnect()).await;
}

#[tokio::test]
async fn test_password_is_sent() {
  init_logging();
  let server = MockMpd::start().await;
  server.require_password("secret");
  let session = Session::new(test_config());

  within(session.connect(server.profile().with_password("secret")))
    .await
    .unwrap();
  server.wait_for("idle", 1).await;
  assert_eq!(server.received()[0], "password secret");
  within(session.disconnect()).await;
}

#[tokio::test]
async fn test_wrong_password_fails_without_retry() {
  init_logging();
  let server = MockMpd::start().await;
  server.require_password("secret");
  let (session, recorder) = session_with_recorder();

  let err = within(session.connect(server.profile().with_password("guess")))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Server(ref ack) if ack.code == 3), "{:?}", err);
  assert_eq!(recorder.states(), vec![Connecting, ConnectionError, Disconnected]);

  tokio::time::sleep(Duration::from_millis(300)).await;
  assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_old_server_skips_password_and_idle() {
  init_logging();
  let server = MockMpd::start().await;
  server.set_greeting("OK MPD 0.9.0");
  let session = Session::new(test_config());

  within(session.connect(server.profile().with_password("secret")))
    .await
    .unwrap();
  let caps = session.capabilities().unwrap();
  assert!(!caps.password && !caps.idle);

  let client = MpdClient::new(session.clone());
  within(client.status()).await.unwrap();
  assert_eq!(server.received(), vec!["status"]);
  within(session.disconnect()).await;
}

#[tokio::test]
async fn test_command_list_needs_server_support() {
  init_logging();
  let server = MockMpd::start().await;
  server.set_greeting("OK MPD 0.11.0");
  let session = Session::new(test_config());
  within(session.connect(server.profile())).await.unwrap();

  let list = mpd_link::CommandList::new()
    .push(mpd_link::Command::clear())
    .push(mpd_link::Command::play());
  let err = within(session.dispatcher().submit_batch(list)).await.unwrap_err();
  assert!(matches!(err, Error::InvalidArgument(_)), "{:?}", err);
  assert_eq!(server.count("command_list_ok_begin"), 0);
  assert_eq!(session.state(), Connected);
  within(session.disconnect()).await;
}

#[tokio::test]
async fn test_connect_active_uses_default_profile() {
  init_logging();
  let server = MockMpd::start().await;
  let mut config = test_config();
  let mut preferred = server.profile();
  preferred.default = true;
  config.profiles = vec![mpd_link::ServerProfile::new("other", "127.0.0.1", 1), preferred];

  let session = Session::new(config.clone());
  within(session.connect_active(&config)).await.unwrap();
  assert_eq!(session.profile().map(|p| p.name), Some("mock".to_string()));
  within(session.disconnect()).await;
}
