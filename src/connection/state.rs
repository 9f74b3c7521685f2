//! The authoritative connection state of a session.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::hub::{EventHub, HubEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
  #[default]
  Disconnected,
  Connecting,
  Connected,
  /// Transient state between an I/O failure and `Disconnected`.
  ConnectionError,
}

impl fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ConnectionState::Disconnected => "disconnected",
      ConnectionState::Connecting => "connecting",
      ConnectionState::Connected => "connected",
      ConnectionState::ConnectionError => "connection error",
    };
    f.write_str(name)
  }
}

/// Single state value shared by all observers.
///
/// Every change is published on the hub under the hub's ordering lock, so
/// listeners see transitions in exactly the order they happened.
pub(crate) struct StateCell {
  current: Mutex<ConnectionState>,
  watch: watch::Sender<ConnectionState>,
  hub: Arc<EventHub>,
}

impl StateCell {
  pub(crate) fn new(hub: Arc<EventHub>) -> Self {
    let (watch, _) = watch::channel(ConnectionState::Disconnected);
    Self {
      current: Mutex::new(ConnectionState::Disconnected),
      watch,
      hub,
    }
  }

  pub(crate) fn get(&self) -> ConnectionState {
    *self.current.lock()
  }

  pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
    self.watch.subscribe()
  }

  /// Move to `to` unless already there. Returns the previous state.
  pub(crate) fn set(&self, to: ConnectionState) -> ConnectionState {
    let mut previous = to;
    self.hub.publish_with(|| {
      let mut current = self.current.lock();
      previous = *current;
      if previous == to {
        return None;
      }
      *current = to;
      drop(current);
      self.watch.send_replace(to);
      log::info!("Connection state: {} -> {}", previous, to);
      Some(HubEvent::ConnectionState(to))
    });
    previous
  }

  /// Move to `to` only if the current state is one of `from`.
  ///
  /// On mismatch nothing changes and the current state is returned.
  pub(crate) fn transition(
    &self,
    from: &[ConnectionState],
    to: ConnectionState,
  ) -> Result<(), ConnectionState> {
    self.transition_if(from, to, || true)
  }

  /// Like [`transition`](Self::transition), but also requires `guard` to
  /// hold. The guard runs under the ordering lock, so no other state change
  /// can slip in between the check and the update.
  pub(crate) fn transition_if<G>(
    &self,
    from: &[ConnectionState],
    to: ConnectionState,
    guard: G,
  ) -> Result<(), ConnectionState>
  where
    G: FnOnce() -> bool,
  {
    let mut outcome = Ok(());
    self.hub.publish_with(|| {
      // Writers all hold the ordering lock, so `previous` stays current
      // while the guard runs without the value lock.
      let previous = self.get();
      if !from.contains(&previous) || !guard() {
        outcome = Err(previous);
        return None;
      }
      if previous == to {
        return None;
      }
      *self.current.lock() = to;
      self.watch.send_replace(to);
      log::info!("Connection state: {} -> {}", previous, to);
      Some(HubEvent::ConnectionState(to))
    });
    outcome
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::hub::{ExecutionContext, ServerListener};

  #[derive(Default)]
  struct States(Mutex<Vec<ConnectionState>>);

  impl ServerListener for States {
    fn on_connection_state_changed(&self, state: ConnectionState) {
      self.0.lock().push(state);
    }
  }

  #[test]
  fn test_set_publishes_only_changes() {
    let hub = Arc::new(EventHub::new());
    let states = Arc::new(States::default());
    hub.subscribe(states.clone(), ExecutionContext::Inline);
    let cell = StateCell::new(hub);

    assert_eq!(cell.set(ConnectionState::Connecting), ConnectionState::Disconnected);
    cell.set(ConnectionState::Connecting);
    cell.set(ConnectionState::Connected);

    assert_eq!(
      *states.0.lock(),
      vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
    assert_eq!(*cell.subscribe().borrow(), ConnectionState::Connected);
  }

  #[test]
  fn test_transition_guards_source_state() {
    let cell = StateCell::new(Arc::new(EventHub::new()));
    assert_eq!(
      cell.transition(&[ConnectionState::Connected], ConnectionState::ConnectionError),
      Err(ConnectionState::Disconnected)
    );
    assert!(cell
      .transition(&[ConnectionState::Disconnected], ConnectionState::Connecting)
      .is_ok());
    assert_eq!(
      cell.transition(&[ConnectionState::Disconnected], ConnectionState::Connecting),
      Err(ConnectionState::Connecting)
    );
    assert_eq!(cell.get(), ConnectionState::Connecting);
  }

  #[test]
  fn test_transition_if_respects_guard() {
    let cell = StateCell::new(Arc::new(EventHub::new()));
    cell.set(ConnectionState::Connecting);
    assert_eq!(
      cell.transition_if(&[ConnectionState::Connecting], ConnectionState::Connected, || false),
      Err(ConnectionState::Connecting)
    );
    assert!(cell
      .transition_if(&[ConnectionState::Connecting], ConnectionState::Connected, || true)
      .is_ok());
    assert_eq!(cell.get(), ConnectionState::Connected);
  }
}
