//! The task that owns the socket.
//!
//! While the job queue is empty the worker parks the connection in `idle`
//! (or pings periodically when idle is unavailable). A queued job cancels
//! idle with `noidle`. Exactly one block is read back after that: either the
//! changes the server had already sent or its reply to `noidle`. Only then
//! is the job written, so commands never interleave with idle output.

use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, TryRecvError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::transport::Transport;
use crate::dispatch::{Expect, Job, Reply, SubResult};
use crate::error::{Error, Result};
use crate::hub::{EventHub, HubEvent};
use crate::model::parse_changes;
use crate::protocol::{Command, Decoded, ProtocolError, Terminator};

#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerSettings {
  pub(crate) use_idle: bool,
  pub(crate) response_timeout: Duration,
  pub(crate) keepalive_interval: Duration,
}

enum Wake {
  Shutdown,
  Job(Option<Job>),
  Changed(Result<Decoded>),
  Keepalive,
}

pub(crate) struct Worker {
  transport: Transport,
  jobs: Receiver<Job>,
  shutdown: CancellationToken,
  hub: Arc<EventHub>,
  settings: WorkerSettings,
}

impl Worker {
  pub(crate) fn new(
    transport: Transport,
    jobs: Receiver<Job>,
    shutdown: CancellationToken,
    hub: Arc<EventHub>,
    settings: WorkerSettings,
  ) -> Self {
    Self {
      transport,
      jobs,
      shutdown,
      hub,
      settings,
    }
  }

  /// Serve jobs until shutdown or a connection failure.
  ///
  /// Nothing is sent before `ready` fires. Jobs still queued when the
  /// worker stops fail with `NotConnected`.
  pub(crate) async fn run(mut self, ready: oneshot::Receiver<()>) -> Result<()> {
    let go = tokio::select! {
      biased;
      _ = self.shutdown.cancelled() => false,
      signal = ready => signal.is_ok(),
    };

    let result = if go { self.serve().await } else { Ok(()) };

    self.jobs.close();
    let mut dropped = 0;
    while let Ok(job) = self.jobs.try_recv() {
      job.complete(Err(Error::NotConnected));
      dropped += 1;
    }
    if dropped > 0 {
      log::debug!("Failed {} queued commands after worker stop", dropped);
    }

    match &result {
      Ok(()) => log::debug!("Socket worker stopped"),
      Err(e) => log::error!("Socket worker failed: {}", e),
    }
    result
  }

  async fn serve(&mut self) -> Result<()> {
    loop {
      if self.shutdown.is_cancelled() {
        return self.close().await;
      }

      match self.jobs.try_recv() {
        Ok(job) => {
          self.execute(job).await?;
          continue;
        }
        Err(TryRecvError::Closed) => return self.close().await,
        Err(TryRecvError::Empty) => {}
      }

      if self.settings.use_idle {
        self.idle().await?;
      } else {
        self.wait_for_job().await?;
      }
    }
  }

  /// Park in `idle` until a change, a job or shutdown arrives.
  async fn idle(&mut self) -> Result<()> {
    self.transport.send(&Command::idle(&[]).encode()).await?;
    log::trace!("Entered idle");

    let wake = tokio::select! {
      biased;
      _ = self.shutdown.cancelled() => Wake::Shutdown,
      decoded = self.transport.read_decoded() => Wake::Changed(decoded),
      job = self.jobs.recv() => Wake::Job(job.ok()),
    };

    match wake {
      Wake::Changed(decoded) => self.publish_changes(decoded?),
      Wake::Job(job) => {
        self.leave_idle().await?;
        if let Some(job) = job {
          self.execute(job).await?;
        }
      }
      Wake::Shutdown => self.leave_idle().await?,
      Wake::Keepalive => {}
    }
    Ok(())
  }

  /// Send `noidle` and consume the one idle result that follows.
  async fn leave_idle(&mut self) -> Result<()> {
    self.transport.send(&Command::no_idle().encode()).await?;
    let decoded = self
      .transport
      .read_decoded_within(self.settings.response_timeout)
      .await?;
    self.publish_changes(decoded);
    Ok(())
  }

  fn publish_changes(&self, decoded: Decoded) {
    match decoded {
      Decoded::Block(block) => {
        for change in parse_changes(block.pairs()) {
          log::debug!("Server changed: {}", change);
          self.hub.publish(HubEvent::ServerChanged(change));
        }
      }
      Decoded::Ack(ack) => log::warn!("Idle rejected by server: {}", ack),
    }
  }

  /// Without idle: wait for a job, pinging the server every interval.
  async fn wait_for_job(&mut self) -> Result<()> {
    let wake = tokio::select! {
      biased;
      _ = self.shutdown.cancelled() => Wake::Shutdown,
      job = self.jobs.recv() => Wake::Job(job.ok()),
      _ = tokio::time::sleep(self.settings.keepalive_interval) => Wake::Keepalive,
    };

    match wake {
      Wake::Job(Some(job)) => self.execute(job).await,
      Wake::Keepalive => self.ping().await,
      Wake::Job(None) | Wake::Shutdown | Wake::Changed(_) => Ok(()),
    }
  }

  async fn ping(&mut self) -> Result<()> {
    log::trace!("Keepalive ping");
    self.transport.send(&Command::ping().encode()).await?;
    match self
      .transport
      .read_decoded_within(self.settings.response_timeout)
      .await?
    {
      Decoded::Block(_) => Ok(()),
      Decoded::Ack(ack) => {
        log::warn!("Keepalive ping rejected: {}", ack);
        Ok(())
      }
    }
  }

  /// Write one job and read its reply.
  ///
  /// Server errors go to the caller only. A connection failure is also
  /// returned so the worker stops.
  async fn execute(&mut self, job: Job) -> Result<()> {
    if job.is_abandoned() {
      log::debug!("Skipping cancelled command {}", job.label());
      job.complete(Err(Error::Cancelled));
      return Ok(());
    }

    log::debug!("-> {}", job.label());
    let outcome = match self.transport.send(job.payload()).await {
      Ok(()) => self.read_reply(job.expect()).await,
      Err(e) => Err(e),
    };

    match outcome {
      Ok(reply) => {
        job.complete(reply);
        Ok(())
      }
      Err(e) => {
        job.complete(Err(Error::ConnectionLost(e.to_string())));
        Err(e)
      }
    }
  }

  /// Outer error: the connection failed. Inner: the caller's result.
  async fn read_reply(&mut self, expect: Expect) -> Result<Result<Reply>> {
    let limit = self.settings.response_timeout;
    match expect {
      Expect::Single => match self.transport.read_decoded_within(limit).await? {
        Decoded::Block(block) if block.terminator() == Terminator::Ok => Ok(Ok(Reply::Block(block))),
        Decoded::Block(_) => Err(ProtocolError::UnexpectedListOk.into()),
        Decoded::Ack(ack) => {
          log::debug!("<- {}", ack);
          Ok(Err(Error::Server(ack)))
        }
      },
      Expect::List(count) => {
        let mut results = Vec::with_capacity(count);
        loop {
          match self.transport.read_decoded_within(limit).await? {
            Decoded::Block(block) if block.terminator() == Terminator::ListOk => {
              results.push(SubResult::Completed(block));
            }
            Decoded::Block(trailer) => {
              if !trailer.is_empty() {
                log::debug!("Ignoring {} stray lines after command list", trailer.pairs().len());
              }
              break;
            }
            Decoded::Ack(ack) => {
              log::debug!("<- {}", ack);
              results.push(SubResult::Failed(ack));
              break;
            }
          }
        }
        results.resize(count.max(results.len()), SubResult::Skipped);
        Ok(Ok(Reply::Batch(results)))
      }
    }
  }

  /// Ask the server to close the connection. Errors are irrelevant here.
  async fn close(&mut self) -> Result<()> {
    if let Err(e) = self.transport.send(&Command::close().encode()).await {
      log::debug!("Failed to send close: {}", e);
    }
    Ok(())
  }
}
