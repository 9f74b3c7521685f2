//! Connection manager.
//!
//! A [`Session`] owns at most one live link to the server. Each link is a
//! socket worker task plus the sending half of its job queue. When a link
//! fails the session reports `ConnectionError`, then `Disconnected`, and
//! schedules a reconnect with exponential backoff until `disconnect` is
//! called.

mod backoff;
mod capabilities;
mod state;
mod transport;
mod worker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::Sender;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::dispatch::{Dispatcher, Job};
use crate::error::{Error, Result};
use crate::hub::EventHub;
use crate::profile::{ProfileStore, ServerProfile};
use crate::protocol::ServerVersion;

pub use backoff::Backoff;
pub use capabilities::ServerCapabilities;
pub use state::ConnectionState;

use state::StateCell;
use transport::Transport;
use worker::{Worker, WorkerSettings};

/// How long `disconnect` waits for the worker to say goodbye.
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// One live connection.
struct Link {
  serial: u64,
  jobs: Sender<Job>,
  shutdown: CancellationToken,
  task: Option<JoinHandle<()>>,
  capabilities: ServerCapabilities,
  connected_at: Instant,
}

impl Drop for Link {
  fn drop(&mut self) {
    self.shutdown.cancel();
  }
}

struct Control {
  /// Bumped by every `connect` and `disconnect`; stale attempts and
  /// reconnect timers compare against it.
  epoch: u64,
  next_serial: u64,
  /// Profile the session should stay connected to.
  wanted: Option<ServerProfile>,
  link: Option<Link>,
  reconnect: Option<CancellationToken>,
  backoff: Backoff,
}

struct Inner {
  config: ClientConfig,
  hub: Arc<EventHub>,
  state: StateCell,
  control: Mutex<Control>,
}

/// Handle to a server session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
  inner: Arc<Inner>,
}

impl Session {
  pub fn new(config: ClientConfig) -> Self {
    Self::with_hub(config, Arc::new(EventHub::new()))
  }

  /// Create a session publishing on an existing hub.
  pub fn with_hub(config: ClientConfig, hub: Arc<EventHub>) -> Self {
    let backoff = Backoff::new(config.backoff.clone());
    Self {
      inner: Arc::new(Inner {
        config,
        state: StateCell::new(hub.clone()),
        hub,
        control: Mutex::new(Control {
          epoch: 0,
          next_serial: 0,
          wanted: None,
          link: None,
          reconnect: None,
          backoff,
        }),
      }),
    }
  }

  /// Connect to `profile`.
  ///
  /// Fails fast with `AlreadyConnecting` or `AlreadyConnected` unless the
  /// session is disconnected. If the attempt fails with a connection error
  /// and auto-reconnect is enabled, the session keeps retrying in the
  /// background until [`disconnect`](Self::disconnect).
  pub async fn connect(&self, profile: ServerProfile) -> Result<()> {
    self
      .inner
      .state
      .transition(&[ConnectionState::Disconnected], ConnectionState::Connecting)
      .map_err(|current| match current {
        ConnectionState::Connected => Error::AlreadyConnected,
        _ => Error::AlreadyConnecting,
      })?;

    let epoch = {
      let mut control = self.inner.control.lock();
      control.epoch += 1;
      control.wanted = Some(profile.clone());
      control.backoff.reset();
      if let Some(timer) = control.reconnect.take() {
        timer.cancel();
      }
      control.epoch
    };

    Inner::attempt(&self.inner, profile, epoch).await
  }

  /// Connect to the active profile of `store`.
  pub async fn connect_active(&self, store: &dyn ProfileStore) -> Result<()> {
    let profile = store.active_profile().ok_or(Error::NoProfile)?;
    self.connect(profile).await
  }

  /// Close the connection and stop reconnecting. Idempotent.
  pub async fn disconnect(&self) {
    let link = {
      let mut control = self.inner.control.lock();
      control.epoch += 1;
      control.wanted = None;
      if let Some(timer) = control.reconnect.take() {
        timer.cancel();
      }
      control.link.take()
    };

    if let Some(mut link) = link {
      log::info!("Disconnecting from server");
      link.shutdown.cancel();
      if let Some(task) = link.task.take() {
        if tokio::time::timeout(WORKER_STOP_TIMEOUT, task).await.is_err() {
          log::warn!("Socket worker did not stop in time");
        }
      }
    }

    self.inner.state.set(ConnectionState::Disconnected);
  }

  /// Same as [`disconnect`](Self::disconnect).
  pub async fn shutdown(&self) {
    self.disconnect().await;
  }

  pub fn state(&self) -> ConnectionState {
    self.inner.state.get()
  }

  /// Receiver that always holds the latest state.
  pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
    self.inner.state.subscribe()
  }

  /// Capabilities of the connected server.
  pub fn capabilities(&self) -> Option<ServerCapabilities> {
    self.inner.control.lock().link.as_ref().map(|l| l.capabilities)
  }

  pub fn server_version(&self) -> Option<ServerVersion> {
    self.capabilities().map(|c| c.version)
  }

  /// Profile the session is connected or reconnecting to.
  pub fn profile(&self) -> Option<ServerProfile> {
    self.inner.control.lock().wanted.clone()
  }

  pub fn dispatcher(&self) -> Dispatcher {
    Dispatcher::new(self.clone())
  }

  pub fn hub(&self) -> &Arc<EventHub> {
    &self.inner.hub
  }

  pub fn config(&self) -> &ClientConfig {
    &self.inner.config
  }

  /// Queue of the live link, or `NotConnected`.
  pub(crate) fn job_sender(&self) -> Result<Sender<Job>> {
    if self.inner.state.get() != ConnectionState::Connected {
      return Err(Error::NotConnected);
    }
    let control = self.inner.control.lock();
    match &control.link {
      Some(link) if !link.jobs.is_closed() => Ok(link.jobs.clone()),
      _ => Err(Error::NotConnected),
    }
  }

  /// Identifies the live link; changes on every reconnect.
  pub(crate) fn link_serial(&self) -> Option<u64> {
    self.inner.control.lock().link.as_ref().map(|l| l.serial)
  }
}

impl Inner {
  /// Open a link. The state must already be `Connecting`.
  async fn attempt(self: &Arc<Self>, profile: ServerProfile, epoch: u64) -> Result<()> {
    log::info!("Connecting to {} ({})", profile.name, profile.address());

    let (transport, capabilities) = match self.open(&profile).await {
      Ok(opened) => opened,
      Err(e) => {
        self.attempt_failed(epoch, &e);
        return Err(e);
      }
    };

    let (ready_tx, ready_rx) = oneshot::channel();
    let serial = {
      let mut control = self.control.lock();
      if control.epoch != epoch {
        log::info!("Connection attempt to {} superseded", profile.address());
        return Err(Error::ConnectAborted);
      }

      control.next_serial += 1;
      let serial = control.next_serial;
      let (jobs_tx, jobs_rx) = async_channel::unbounded();
      let shutdown = CancellationToken::new();
      let settings = WorkerSettings {
        use_idle: self.config.use_idle && capabilities.idle,
        response_timeout: self.config.response_timeout(),
        keepalive_interval: self.config.keepalive_interval(),
      };
      let worker = Worker::new(transport, jobs_rx, shutdown.clone(), self.hub.clone(), settings);

      let weak = Arc::downgrade(self);
      let task = tokio::spawn(async move {
        let result = worker.run(ready_rx).await;
        if let Some(inner) = weak.upgrade() {
          inner.link_closed(serial, result);
        }
      });

      control.link = Some(Link {
        serial,
        jobs: jobs_tx,
        shutdown,
        task: Some(task),
        capabilities,
        connected_at: Instant::now(),
      });
      serial
    };

    let published = self.state.transition_if(
      &[ConnectionState::Connecting],
      ConnectionState::Connected,
      || self.owns_link(epoch, serial),
    );
    if published.is_err() {
      // A disconnect, possibly followed by a newer connect, got in first.
      let stale = {
        let mut control = self.control.lock();
        match &control.link {
          Some(link) if link.serial == serial => control.link.take(),
          _ => None,
        }
      };
      drop(stale);
      log::info!("Connection to {} aborted", profile.address());
      return Err(Error::ConnectAborted);
    }

    log::info!(
      "Connected to {} (MPD {}, link {})",
      profile.address(),
      capabilities.version,
      serial
    );
    // The worker may not touch the socket before Connected was published.
    let _ = ready_tx.send(());
    Ok(())
  }

  async fn open(&self, profile: &ServerProfile) -> Result<(Transport, ServerCapabilities)> {
    let (mut transport, version) = Transport::open(
      profile,
      self.config.connect_timeout(),
      self.config.response_timeout(),
    )
    .await?;
    let capabilities = ServerCapabilities::from_version(version);
    log::debug!("Server greeting: MPD {}", version);

    if let Some(password) = profile.credentials() {
      if capabilities.password {
        transport
          .authenticate(password, self.config.response_timeout())
          .await?;
        log::debug!("Authenticated with {}", profile.address());
      } else {
        log::warn!("MPD {} does not support passwords, connecting without one", version);
      }
    }
    Ok((transport, capabilities))
  }

  /// Whether the attempt of `epoch` is still current and `serial` is its link.
  fn owns_link(&self, epoch: u64, serial: u64) -> bool {
    let control = self.control.lock();
    control.epoch == epoch && control.link.as_ref().is_some_and(|l| l.serial == serial)
  }

  fn is_current(&self, epoch: u64) -> bool {
    self.control.lock().epoch == epoch
  }

  fn attempt_failed(self: &Arc<Self>, epoch: u64, error: &Error) {
    if !self.is_current(epoch) {
      log::info!("Superseded connection attempt failed: {}", error);
      return;
    }
    log::error!("Connection attempt failed: {}", error);
    if self
      .state
      .transition_if(
        &[ConnectionState::Connecting],
        ConnectionState::ConnectionError,
        || self.is_current(epoch),
      )
      .is_ok()
    {
      // Fails harmlessly if a disconnect already moved on.
      let _ = self
        .state
        .transition(&[ConnectionState::ConnectionError], ConnectionState::Disconnected);
    }

    if error.is_connection_failure() {
      self.schedule_reconnect(epoch, false);
    } else {
      // Rejected credentials will not fix themselves.
      let mut control = self.control.lock();
      if control.epoch == epoch {
        control.wanted = None;
      }
    }
  }

  /// Called by the worker task when it stops.
  fn link_closed(self: &Arc<Self>, serial: u64, result: Result<()>) {
    let Err(error) = result else {
      return;
    };

    let (epoch, stable) = {
      let mut control = self.control.lock();
      match &control.link {
        Some(link) if link.serial == serial => {}
        _ => return,
      }
      let stable = control
        .link
        .take()
        .map(|link| link.connected_at.elapsed() >= self.config.backoff.stability_window())
        .unwrap_or(false);
      (control.epoch, stable)
    };

    log::error!("Connection lost: {}", error);
    if self
      .state
      .transition(&[ConnectionState::Connected], ConnectionState::ConnectionError)
      .is_err()
    {
      return;
    }
    self.state.set(ConnectionState::Disconnected);
    self.schedule_reconnect(epoch, stable);
  }

  fn schedule_reconnect(self: &Arc<Self>, epoch: u64, reset_backoff: bool) {
    if !self.config.auto_reconnect {
      return;
    }

    let (delay, timer) = {
      let mut control = self.control.lock();
      if control.epoch != epoch || control.wanted.is_none() {
        return;
      }
      if reset_backoff {
        control.backoff.reset();
      }
      let delay = control.backoff.next_delay();
      let timer = CancellationToken::new();
      if let Some(previous) = control.reconnect.replace(timer.clone()) {
        previous.cancel();
      }
      (delay, timer)
    };

    log::info!("Reconnecting in {:?}", delay);
    let weak = Arc::downgrade(self);
    tokio::spawn(async move {
      tokio::select! {
        _ = timer.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
      }
      if let Some(inner) = weak.upgrade() {
        inner.reconnect(epoch).await;
      }
    });
  }

  async fn reconnect(self: Arc<Self>, epoch: u64) {
    let profile = {
      let mut control = self.control.lock();
      if control.epoch != epoch {
        return;
      }
      control.reconnect = None;
      match control.wanted.clone() {
        Some(profile) => profile,
        None => return,
      }
    };

    if let Err(current) = self
      .state
      .transition(&[ConnectionState::Disconnected], ConnectionState::Connecting)
    {
      log::debug!("Skipping reconnect while {}", current);
      return;
    }

    if let Err(e) = Inner::attempt(&self, profile, epoch).await {
      log::warn!("Reconnect failed: {}", e);
    }
  }
}
