//! Connects to the configured server and logs what happens on it.

use std::path::PathBuf;
use std::sync::Arc;

use mpd_link::model::ChangeKind;
use mpd_link::{
  ClientConfig, ConnectionState, ExecutionContext, MpdClient, ServerListener, Session,
};

struct LogListener {
  client: MpdClient,
}

impl ServerListener for LogListener {
  fn on_connection_state_changed(&self, state: ConnectionState) {
    log::info!("Connection {}", state);
  }

  fn on_server_changed(&self, change: ChangeKind) {
    log::info!("Server changed: {}", change);
    if change != ChangeKind::Player {
      return;
    }
    let client = self.client.clone();
    tokio::spawn(async move {
      match client.current_song().await {
        Ok(Some(track)) => log::info!("Now playing: {}", track.display_title()),
        Ok(None) => log::info!("Nothing playing"),
        Err(e) => log::warn!("Failed to fetch current song: {}", e),
      }
    });
  }
}

#[tokio::main]
async fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let path = std::env::args().nth(1).map(PathBuf::from);
  let config = match ClientConfig::load_or_default(path.as_deref()) {
    Ok(config) => config,
    Err(e) => {
      log::error!("Failed to load config: {}", e);
      std::process::exit(1);
    }
  };

  let session = Session::new(config.clone());
  let client = MpdClient::new(session.clone());
  // Background context: the listener spawns onto the runtime.
  session.hub().subscribe(
    Arc::new(LogListener {
      client: client.clone(),
    }),
    ExecutionContext::Background,
  );

  match session.connect_active(&config).await {
    Ok(()) => match client.status().await {
      Ok(status) => log::info!(
        "State {:?}, volume {:?}, {} songs queued",
        status.state,
        status.volume,
        status.playlist_length
      ),
      Err(e) => log::warn!("Failed to fetch status: {}", e),
    },
    Err(mpd_link::Error::NoProfile) => {
      log::error!("No server profile configured");
      std::process::exit(1);
    }
    Err(e) => log::warn!("Initial connect failed, retrying in background: {}", e),
  }

  if let Err(e) = tokio::signal::ctrl_c().await {
    log::error!("Failed to wait for Ctrl+C: {}", e);
  }
  log::info!("Shutting down");
  session.shutdown().await;
}
