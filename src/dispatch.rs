//! Command dispatcher.
//!
//! Every request becomes a [`Job`] on the session's FIFO queue. The socket
//! worker is the only consumer, so commands from concurrent callers are sent
//! and answered strictly one after another.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::connection::{ConnectionState, Session};
use crate::error::{Error, Result};
use crate::model::FromResponse;
use crate::protocol::{AckError, Command, CommandList, ProtocolError, ResponseBlock};

/// Outcome of one sub-command of a command list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubResult {
  Completed(ResponseBlock),
  Failed(AckError),
  /// Not executed because an earlier sub-command failed.
  Skipped,
}

impl SubResult {
  pub fn is_completed(&self) -> bool {
    matches!(self, SubResult::Completed(_))
  }

  pub fn into_result(self) -> Result<ResponseBlock> {
    match self {
      SubResult::Completed(block) => Ok(block),
      SubResult::Failed(ack) => Err(Error::Server(ack)),
      SubResult::Skipped => Err(Error::Cancelled),
    }
  }
}

/// Whether a command is resubmitted after the connection comes back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
  #[default]
  Never,
  /// Wait up to `wait` for the next connection and submit once more.
  OnceAfterReconnect { wait: Duration },
}

impl RetryPolicy {
  /// Retry once, waiting as long as `config.retry_wait_ms` allows.
  pub fn once_after_reconnect(config: &ClientConfig) -> Self {
    RetryPolicy::OnceAfterReconnect {
      wait: config.retry_wait(),
    }
  }
}

/// What the worker must read back for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
  Single,
  List(usize),
}

#[derive(Debug)]
pub(crate) enum Reply {
  Block(ResponseBlock),
  Batch(Vec<SubResult>),
}

enum Completion {
  Caller(oneshot::Sender<Result<Reply>>),
  /// Fire-and-forget: failures are logged.
  Detached,
}

/// One queued request.
pub(crate) struct Job {
  label: String,
  payload: Vec<u8>,
  expect: Expect,
  completion: Completion,
  cancel: Option<CancellationToken>,
}

impl Job {
  pub(crate) fn new(
    label: String,
    payload: Vec<u8>,
    expect: Expect,
  ) -> (Self, oneshot::Receiver<Result<Reply>>) {
    let (tx, rx) = oneshot::channel();
    let job = Self {
      label,
      payload,
      expect,
      completion: Completion::Caller(tx),
      cancel: None,
    };
    (job, rx)
  }

  fn detached(command: &Command) -> Self {
    Self {
      label: command.to_string(),
      payload: command.encode(),
      expect: Expect::Single,
      completion: Completion::Detached,
      cancel: None,
    }
  }

  pub(crate) fn label(&self) -> &str {
    &self.label
  }

  pub(crate) fn payload(&self) -> &[u8] {
    &self.payload
  }

  pub(crate) fn expect(&self) -> Expect {
    self.expect
  }

  /// Nobody is waiting for this job any more.
  pub(crate) fn is_abandoned(&self) -> bool {
    if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
      return true;
    }
    match &self.completion {
      Completion::Caller(tx) => tx.is_closed(),
      Completion::Detached => false,
    }
  }

  pub(crate) fn complete(self, result: Result<Reply>) {
    match self.completion {
      Completion::Caller(tx) => {
        // The caller may have given up; the result is dropped then.
        let _ = tx.send(result);
      }
      Completion::Detached => match result {
        Ok(_) => log::debug!("Command {} done", self.label),
        Err(e) => log::warn!("Command {} failed: {}", self.label, e),
      },
    }
  }
}

/// Submits commands to the connected server.
#[derive(Clone)]
pub struct Dispatcher {
  session: Session,
}

impl Dispatcher {
  pub(crate) fn new(session: Session) -> Self {
    Self { session }
  }

  /// Send one command and parse its response.
  ///
  /// Fails immediately with `NotConnected` when the session is not
  /// connected; nothing is queued in that case.
  pub async fn submit<T: FromResponse>(&self, command: Command) -> Result<T> {
    let block = self.submit_block(&command, None).await?;
    T::from_response(block)
  }

  /// Like [`submit`](Self::submit), but gives up when `token` fires.
  ///
  /// A job cancelled while queued is never sent. One cancelled in flight
  /// still completes on the wire but its result is discarded.
  pub async fn submit_cancellable<T: FromResponse>(
    &self,
    command: Command,
    token: &CancellationToken,
  ) -> Result<T> {
    let block = self.submit_block(&command, Some(token)).await?;
    T::from_response(block)
  }

  /// Run a command list atomically. Results come back in input order.
  pub async fn submit_batch(&self, list: CommandList) -> Result<Vec<SubResult>> {
    if list.is_empty() {
      return Ok(Vec::new());
    }
    if let Some(command) = list.find_multi_line() {
      return Err(line_break_error(command));
    }
    if self.session.capabilities().is_some_and(|c| !c.command_lists) {
      return Err(Error::InvalidArgument(
        "server does not support command lists".to_string(),
      ));
    }
    let label = format!("command list ({} commands)", list.len());
    let (job, rx) = Job::new(label, list.encode(), Expect::List(list.len()));
    self.enqueue(job)?;
    match await_reply(rx, None).await? {
      Reply::Batch(results) => Ok(results),
      Reply::Block(_) => Err(ProtocolError::Syntax("expected command list reply".to_string()).into()),
    }
  }

  /// Queue a command without waiting for it. Failures are logged.
  pub fn send(&self, command: Command) -> Result<()> {
    let queued = if command.is_single_line() {
      self.enqueue(Job::detached(&command))
    } else {
      Err(line_break_error(&command))
    };
    match queued {
      Ok(()) => Ok(()),
      Err(e) => {
        log::warn!("Command {} not sent: {}", command, e);
        Err(e)
      }
    }
  }

  /// Submit with an explicit retry policy.
  ///
  /// With `OnceAfterReconnect`, a command that failed because the
  /// connection was missing or dropped is resubmitted exactly once after
  /// the session reconnects within `wait`.
  pub async fn submit_with<T: FromResponse>(&self, command: Command, policy: RetryPolicy) -> Result<T> {
    let failed_link = self.session.link_serial();
    let first = self.submit::<T>(command.clone()).await;

    let wait = match (&first, policy) {
      (Err(e), RetryPolicy::OnceAfterReconnect { wait }) if e.is_retryable() => wait,
      _ => return first,
    };

    if !self.await_reconnect(failed_link, wait).await {
      return first;
    }
    log::info!("Retrying {} after reconnect", command);
    self.submit(command).await
  }

  /// Submit, retrying once after a reconnect within the configured
  /// `retryWaitMs`.
  pub async fn submit_retrying<T: FromResponse>(&self, command: Command) -> Result<T> {
    let policy = RetryPolicy::once_after_reconnect(self.session.config());
    self.submit_with(command, policy).await
  }

  async fn submit_block(&self, command: &Command, token: Option<&CancellationToken>) -> Result<ResponseBlock> {
    if token.is_some_and(|t| t.is_cancelled()) {
      return Err(Error::Cancelled);
    }
    if !command.is_single_line() {
      return Err(line_break_error(command));
    }
    let (mut job, rx) = Job::new(command.to_string(), command.encode(), Expect::Single);
    job.cancel = token.cloned();
    self.enqueue(job)?;
    match await_reply(rx, token).await? {
      Reply::Block(block) => Ok(block),
      Reply::Batch(_) => Err(ProtocolError::UnexpectedListOk.into()),
    }
  }

  fn enqueue(&self, job: Job) -> Result<()> {
    let jobs = self.session.job_sender()?;
    log::trace!("Queued {}", job.label);
    jobs.try_send(job).map_err(|_| Error::NotConnected)
  }

  /// Wait until a link other than `failed_link` is up.
  async fn await_reconnect(&self, failed_link: Option<u64>, wait: Duration) -> bool {
    let mut states = self.session.watch_state();
    let reconnected = async {
      loop {
        let serial = self.session.link_serial();
        if self.session.state() == ConnectionState::Connected && serial.is_some() && serial != failed_link {
          return true;
        }
        if states.changed().await.is_err() {
          return false;
        }
      }
    };
    tokio::time::timeout(wait, reconnected).await.unwrap_or(false)
  }
}

fn line_break_error(command: &Command) -> Error {
  Error::InvalidArgument(format!("line break in arguments of {}", command.verb()))
}

async fn await_reply(
  rx: oneshot::Receiver<Result<Reply>>,
  token: Option<&CancellationToken>,
) -> Result<Reply> {
  let received = match token {
    Some(token) => tokio::select! {
      biased;
      _ = token.cancelled() => return Err(Error::Cancelled),
      received = rx => received,
    },
    None => rx.await,
  };
  received.map_err(|_| Error::ConnectionLost("command dropped by worker".to_string()))?
}
