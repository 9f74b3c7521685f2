//! Event hub for connection state and server change notifications.
//!
//! Listeners register with the execution context they need to be called on.
//! Publications are serialized, so every listener observes events in one
//! total order. The registration table may change while a publish is in
//! flight: each publish works on a snapshot, and a listener removed in the
//! meantime is skipped at invocation time.

mod executor;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_channel::Sender;
use parking_lot::{ReentrantMutex, RwLock};
use uuid::Uuid;

use crate::connection::ConnectionState;
use crate::model::ChangeKind;

pub use executor::{Executor, MainLoop, MainLoopHandle, Task};

/// Receiver of session events. Both callbacks default to no-ops.
pub trait ServerListener: Send + Sync + 'static {
  fn on_connection_state_changed(&self, state: ConnectionState) {
    let _ = state;
  }

  fn on_server_changed(&self, change: ChangeKind) {
    let _ = change;
  }
}

/// Event fanned out to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubEvent {
  ConnectionState(ConnectionState),
  ServerChanged(ChangeKind),
}

impl HubEvent {
  fn deliver(self, listener: &dyn ServerListener) {
    match self {
      HubEvent::ConnectionState(state) => listener.on_connection_state_changed(state),
      HubEvent::ServerChanged(change) => listener.on_server_changed(change),
    }
  }
}

/// Stable handle of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl fmt::Display for ListenerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

/// Where a listener's callbacks run.
#[derive(Clone, Default)]
pub enum ExecutionContext {
  /// On the publishing thread, synchronously. Callbacks must be short.
  #[default]
  Inline,
  /// On a dedicated ordered delivery queue owned by the hub.
  Background,
  /// Posted to an external FIFO executor such as a UI loop.
  Executor(Arc<dyn Executor>),
}

impl fmt::Debug for ExecutionContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ExecutionContext::Inline => f.write_str("Inline"),
      ExecutionContext::Background => f.write_str("Background"),
      ExecutionContext::Executor(_) => f.write_str("Executor(..)"),
    }
  }
}

enum Delivery {
  Inline,
  Queue(Sender<HubEvent>),
  Executor(Arc<dyn Executor>),
}

struct Registration {
  id: ListenerId,
  listener: Arc<dyn ServerListener>,
  delivery: Delivery,
  active: Arc<AtomicBool>,
}

/// Thread-safe pub/sub registry.
pub struct EventHub {
  registrations: RwLock<Vec<Arc<Registration>>>,
  // Re-entrant so an inline listener may itself trigger a publish.
  order: ReentrantMutex<()>,
}

impl EventHub {
  pub fn new() -> Self {
    Self {
      registrations: RwLock::new(Vec::new()),
      order: ReentrantMutex::new(()),
    }
  }

  /// Register a listener. It receives every event published from now on.
  pub fn subscribe(
    &self,
    listener: Arc<dyn ServerListener>,
    context: ExecutionContext,
  ) -> ListenerId {
    let id = ListenerId(Uuid::new_v4());
    let active = Arc::new(AtomicBool::new(true));
    let delivery = match context {
      ExecutionContext::Inline => Delivery::Inline,
      ExecutionContext::Background => {
        Delivery::Queue(spawn_delivery_queue(id, listener.clone(), active.clone()))
      }
      ExecutionContext::Executor(executor) => Delivery::Executor(executor),
    };

    self.registrations.write().push(Arc::new(Registration {
      id,
      listener,
      delivery,
      active,
    }));
    log::debug!("Listener {} subscribed", id);
    id
  }

  /// Remove a listener. Returns false if it was not registered.
  ///
  /// Once this returns the listener is not invoked again, even for events
  /// published concurrently.
  pub fn unsubscribe(&self, id: ListenerId) -> bool {
    let removed = {
      let mut registrations = self.registrations.write();
      registrations
        .iter()
        .position(|r| r.id == id)
        .map(|index| registrations.remove(index))
    };

    match removed {
      Some(registration) => {
        registration.active.store(false, Ordering::SeqCst);
        if let Delivery::Queue(tx) = &registration.delivery {
          tx.close();
        }
        log::debug!("Listener {} unsubscribed", id);
        true
      }
      None => false,
    }
  }

  /// Deliver an event to every registered listener.
  pub fn publish(&self, event: HubEvent) {
    let _order = self.order.lock();
    self.deliver(event);
  }

  /// Run `produce` and publish its event while holding the ordering lock.
  ///
  /// Used for state transitions so that the order listeners observe matches
  /// the order in which the state actually changed.
  pub(crate) fn publish_with<F>(&self, produce: F)
  where
    F: FnOnce() -> Option<HubEvent>,
  {
    let _order = self.order.lock();
    if let Some(event) = produce() {
      self.deliver(event);
    }
  }

  pub fn listener_count(&self) -> usize {
    self.registrations.read().len()
  }

  fn deliver(&self, event: HubEvent) {
    let snapshot: Vec<Arc<Registration>> = self.registrations.read().clone();

    for registration in snapshot {
      if !registration.active.load(Ordering::SeqCst) {
        continue;
      }
      match &registration.delivery {
        Delivery::Inline => event.deliver(registration.listener.as_ref()),
        Delivery::Queue(tx) => {
          if tx.try_send(event).is_err() {
            log::debug!("Delivery queue of listener {} closed", registration.id);
          }
        }
        Delivery::Executor(executor) => {
          let listener = registration.listener.clone();
          let active = registration.active.clone();
          executor.execute(Box::new(move || {
            if active.load(Ordering::SeqCst) {
              event.deliver(listener.as_ref());
            }
          }));
        }
      }
    }
  }
}

impl Default for EventHub {
  fn default() -> Self {
    Self::new()
  }
}

/// Start the ordered delivery queue of a background listener.
///
/// Runs as a tokio task when called inside a runtime, otherwise on a thread.
fn spawn_delivery_queue(
  id: ListenerId,
  listener: Arc<dyn ServerListener>,
  active: Arc<AtomicBool>,
) -> Sender<HubEvent> {
  let (tx, rx) = async_channel::unbounded::<HubEvent>();

  match tokio::runtime::Handle::try_current() {
    Ok(handle) => {
      handle.spawn(async move {
        while let Ok(event) = rx.recv().await {
          if !active.load(Ordering::SeqCst) {
            break;
          }
          event.deliver(listener.as_ref());
        }
      });
    }
    Err(_) => {
      let spawned = std::thread::Builder::new()
        .name(format!("listener-{}", id))
        .spawn(move || {
          while let Ok(event) = rx.recv_blocking() {
            if !active.load(Ordering::SeqCst) {
              break;
            }
            event.deliver(listener.as_ref());
          }
        });
      if let Err(e) = spawned {
        log::error!("Failed to start delivery thread for listener {}: {}", id, e);
      }
    }
  }

  tx
}
