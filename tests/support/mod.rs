#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Mock MPD server for integration tests.
//!
//! Speaks the line protocol on a random local port. Every line a client
//! sends is recorded. Responses are scripted per command line or per verb;
//! unscripted commands answer `OK`. Idle is emulated: an `idle` blocks until
//! a change is pushed or the client sends `noidle`.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mpd_link::{
  BackoffConfig, ClientConfig, ConnectionState, ServerListener, ServerProfile,
};
use mpd_link::model::ChangeKind;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const GREETING: &str = "OK MPD 0.23.5";

pub fn init_logging() {
  let _ = env_logger::builder().is_test(true).try_init();
}

/// Fast timeouts and reconnects for tests.
pub fn test_config() -> ClientConfig {
  ClientConfig {
    connect_timeout_ms: 1_000,
    response_timeout_ms: 2_000,
    keepalive_interval_secs: 30,
    use_idle: true,
    auto_reconnect: true,
    retry_wait_ms: 2_000,
    backoff: BackoffConfig {
      initial_ms: 50,
      multiplier: 2.0,
      max_ms: 200,
      stability_window_ms: 10_000,
    },
    profiles: Vec::new(),
  }
}

#[derive(Clone)]
enum Scripted {
  Ok { body: String, delay: Duration },
  Ack { code: u32, message: String },
}

struct Shared {
  greeting: Mutex<String>,
  greeting_delay: Mutex<Duration>,
  scripts: Mutex<HashMap<String, Scripted>>,
  password: Mutex<Option<String>>,
  received: Mutex<Vec<String>>,
  pending_changes: Mutex<Vec<String>>,
  changed: Notify,
  kick: Mutex<CancellationToken>,
  accepting: AtomicBool,
  connections: AtomicUsize,
}

pub struct MockMpd {
  addr: SocketAddr,
  shared: Arc<Shared>,
  handle: JoinHandle<()>,
}

impl MockMpd {
  pub async fn start() -> Self {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shared = Arc::new(Shared {
      greeting: Mutex::new(GREETING.to_string()),
      greeting_delay: Mutex::new(Duration::ZERO),
      scripts: Mutex::new(HashMap::new()),
      password: Mutex::new(None),
      received: Mutex::new(Vec::new()),
      pending_changes: Mutex::new(Vec::new()),
      changed: Notify::new(),
      kick: Mutex::new(CancellationToken::new()),
      accepting: AtomicBool::new(true),
      connections: AtomicUsize::new(0),
    });

    let accept_shared = shared.clone();
    let handle = tokio::spawn(async move {
      while let Ok((stream, _)) = listener.accept().await {
        accept_shared.connections.fetch_add(1, Ordering::SeqCst);
        if !accept_shared.accepting.load(Ordering::SeqCst) {
          drop(stream);
          continue;
        }
        let shared = accept_shared.clone();
        tokio::spawn(async move {
          handle_connection(stream, shared).await;
        });
      }
    });

    Self {
      addr,
      shared,
      handle,
    }
  }

  pub fn addr(&self) -> SocketAddr {
    self.addr
  }

  pub fn profile(&self) -> ServerProfile {
    ServerProfile::new("mock", "127.0.0.1", self.addr.port())
  }

  pub fn set_greeting(&self, greeting: &str) {
    *self.shared.greeting.lock() = greeting.to_string();
  }

  /// Hold back the greeting of every new connection by `delay`.
  pub fn set_greeting_delay(&self, delay: Duration) {
    *self.shared.greeting_delay.lock() = delay;
  }

  pub fn require_password(&self, password: &str) {
    *self.shared.password.lock() = Some(password.to_string());
  }

  /// Answer `key` (a full command line or a verb) with `body` then `OK`.
  pub fn respond(&self, key: &str, body: &str) {
    self.respond_after(key, body, Duration::ZERO);
  }

  pub fn respond_after(&self, key: &str, body: &str, delay: Duration) {
    self.shared.scripts.lock().insert(
      key.to_string(),
      Scripted::Ok {
        body: body.to_string(),
        delay,
      },
    );
  }

  /// Answer `key` with an ACK.
  pub fn fail(&self, key: &str, code: u32, message: &str) {
    self.shared.scripts.lock().insert(
      key.to_string(),
      Scripted::Ack {
        code,
        message: message.to_string(),
      },
    );
  }

  /// Queue a `changed:` line. Delivered at the next (or current) idle.
  pub fn push_change(&self, subsystem: &str) {
    self.shared.pending_changes.lock().push(subsystem.to_string());
    self.shared.changed.notify_one();
  }

  /// Drop every open connection without a goodbye.
  pub fn reset_connections(&self) {
    let mut kick = self.shared.kick.lock();
    kick.cancel();
    *kick = CancellationToken::new();
  }

  /// When false, new connections are closed before the greeting.
  pub fn set_accepting(&self, accepting: bool) {
    self.shared.accepting.store(accepting, Ordering::SeqCst);
  }

  /// Connections accepted so far, including refused ones.
  pub fn connections(&self) -> usize {
    self.shared.connections.load(Ordering::SeqCst)
  }

  pub fn received(&self) -> Vec<String> {
    self.shared.received.lock().clone()
  }

  pub fn clear_received(&self) {
    self.shared.received.lock().clear();
  }

  pub fn count(&self, line: &str) -> usize {
    self.shared.received.lock().iter().filter(|l| *l == line).count()
  }

  /// Wait until `line` has been received `times` times in total.
  pub async fn wait_for(&self, line: &str, times: usize) {
    let found = wait_until(Duration::from_secs(5), || self.count(line) >= times).await;
    assert!(found, "never received {:?} x{}; got {:?}", line, times, self.received());
  }

  pub async fn stop(self) {
    self.reset_connections();
    self.handle.abort();
  }
}

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>) {
  let kick = shared.kick.lock().clone();
  let (reader, mut writer) = stream.into_split();
  let mut lines = BufReader::new(reader).lines();

  let delay = *shared.greeting_delay.lock();
  if !delay.is_zero() {
    tokio::time::sleep(delay).await;
  }
  let greeting = format!("{}\n", shared.greeting.lock());
  if writer.write_all(greeting.as_bytes()).await.is_err() {
    return;
  }

  tokio::select! {
    _ = kick.cancelled() => {}
    _ = serve(&mut lines, &mut writer, &shared) => {}
  }
}

async fn serve(
  lines: &mut Lines<BufReader<OwnedReadHalf>>,
  writer: &mut OwnedWriteHalf,
  shared: &Shared,
) {
  while let Ok(Some(line)) = lines.next_line().await {
    shared.received.lock().push(line.clone());
    let verb = line.split_whitespace().next().unwrap_or("").to_string();

    let reply = match verb.as_str() {
      "idle" => match idle(lines, shared).await {
        Some(reply) => reply,
        None => return,
      },
      // Outside idle the server ignores noidle.
      "noidle" => continue,
      "close" => return,
      "password" => {
        let expected = shared.password.lock().clone();
        let given = line.strip_prefix("password ").unwrap_or("").trim_matches('"');
        match expected {
          Some(expected) if expected != given => {
            "ACK [3@0] {password} incorrect password\n".to_string()
          }
          _ => "OK\n".to_string(),
        }
      }
      "command_list_ok_begin" => {
        let mut commands = Vec::new();
        while let Ok(Some(next)) = lines.next_line().await {
          shared.received.lock().push(next.clone());
          if next == "command_list_end" {
            break;
          }
          commands.push(next);
        }
        run_list(&commands, shared).await
      }
      _ => match lookup(shared, &line, &verb) {
        Some(Scripted::Ok { body, delay }) => {
          if !delay.is_zero() {
            tokio::time::sleep(delay).await;
          }
          format!("{}OK\n", body)
        }
        Some(Scripted::Ack { code, message }) => format!("ACK [{}@0] {{{}}} {}\n", code, verb, message),
        None => "OK\n".to_string(),
      },
    };

    if writer.write_all(reply.as_bytes()).await.is_err() {
      return;
    }
  }
}

/// Block in idle. `None` when the client went away.
async fn idle(lines: &mut Lines<BufReader<OwnedReadHalf>>, shared: &Shared) -> Option<String> {
  loop {
    let pending: Vec<String> = std::mem::take(&mut *shared.pending_changes.lock());
    if !pending.is_empty() {
      let mut reply: String = pending.iter().map(|s| format!("changed: {}\n", s)).collect();
      reply.push_str("OK\n");
      return Some(reply);
    }

    tokio::select! {
      _ = shared.changed.notified() => continue,
      line = lines.next_line() => {
        let line = line.ok().flatten()?;
        shared.received.lock().push(line.clone());
        if line == "noidle" {
          return Some("OK\n".to_string());
        }
        return Some(format!("ACK [2@0] {{{}}} only noidle is allowed while idle\n", line));
      }
    }
  }
}

async fn run_list(commands: &[String], shared: &Shared) -> String {
  let mut reply = String::new();
  for (index, line) in commands.iter().enumerate() {
    let verb = line.split_whitespace().next().unwrap_or("");
    match lookup(shared, line, verb) {
      Some(Scripted::Ack { code, message }) => {
        reply.push_str(&format!("ACK [{}@{}] {{{}}} {}\n", code, index, verb, message));
        return reply;
      }
      Some(Scripted::Ok { body, delay }) => {
        if !delay.is_zero() {
          tokio::time::sleep(delay).await;
        }
        reply.push_str(&body);
        reply.push_str("list_OK\n");
      }
      None => reply.push_str("list_OK\n"),
    }
  }
  reply.push_str("OK\n");
  reply
}

fn lookup(shared: &Shared, line: &str, verb: &str) -> Option<Scripted> {
  let scripts = shared.scripts.lock();
  scripts.get(line).or_else(|| scripts.get(verb)).cloned()
}

/// Poll `condition` every few milliseconds until it holds or time runs out.
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
  F: FnMut() -> bool,
{
  let deadline = tokio::time::Instant::now() + limit;
  while tokio::time::Instant::now() < deadline {
    if condition() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  condition()
}

/// Run `future` with a generous timeout so a hang fails the test.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
  tokio::time::timeout(Duration::from_secs(5), future)
    .await
    .expect("timed out")
}

/// Records every event it receives.
#[derive(Default)]
pub struct Recorder {
  pub states: Mutex<Vec<ConnectionState>>,
  pub changes: Mutex<Vec<ChangeKind>>,
}

impl Recorder {
  pub fn states(&self) -> Vec<ConnectionState> {
    self.states.lock().clone()
  }

  pub fn changes(&self) -> Vec<ChangeKind> {
    self.changes.lock().clone()
  }
}

impl ServerListener for Recorder {
  fn on_connection_state_changed(&self, state: ConnectionState) {
    self.states.lock().push(state);
  }

  fn on_server_changed(&self, change: ChangeKind) {
    self.changes.lock().push(change);
  }
}
