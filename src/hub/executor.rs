//! Execution contexts for listener callbacks.

use std::fmt;

use async_channel::{Receiver, Sender, TryRecvError};

/// Unit of work posted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// External execution context, e.g. a UI thread's event loop.
///
/// Implementations must run tasks in the order they were posted; the hub
/// relies on this to keep per-listener delivery ordered.
pub trait Executor: Send + Sync {
  fn execute(&self, task: Task);
}

/// FIFO task queue drained by the thread that owns it.
///
/// This models a UI thread: the owner calls [`MainLoop::run_pending`] from its
/// own loop (or parks in [`MainLoop::run`]) and every listener registered
/// with the matching [`MainLoopHandle`] is invoked on that thread.
pub struct MainLoop {
  rx: Receiver<Task>,
}

/// Posting side of a [`MainLoop`].
#[derive(Clone)]
pub struct MainLoopHandle {
  tx: Sender<Task>,
}

impl MainLoop {
  pub fn new() -> (Self, MainLoopHandle) {
    let (tx, rx) = async_channel::unbounded();
    (Self { rx }, MainLoopHandle { tx })
  }

  /// Run every task queued so far. Returns how many ran.
  pub fn run_pending(&self) -> usize {
    let mut ran = 0;
    loop {
      match self.rx.try_recv() {
        Ok(task) => {
          task();
          ran += 1;
        }
        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return ran,
      }
    }
  }

  /// Block the current thread running tasks until every handle is dropped.
  pub fn run(&self) {
    while let Ok(task) = self.rx.recv_blocking() {
      task();
    }
  }

  /// Number of tasks waiting to run.
  pub fn pending(&self) -> usize {
    self.rx.len()
  }
}

impl Executor for MainLoopHandle {
  fn execute(&self, task: Task) {
    if self.tx.try_send(task).is_err() {
      log::warn!("Main loop is gone, dropping listener callback");
    }
  }
}

impl fmt::Debug for MainLoopHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MainLoopHandle")
      .field("queued", &self.tx.len())
      .finish()
  }
}
