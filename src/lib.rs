//! Client and connection-state engine for the Music Player Daemon protocol.
//!
//! A [`Session`] keeps one TCP connection to a server alive, parking it in
//! `idle` between commands and reconnecting with backoff when it drops.
//! Commands go through the session's [`Dispatcher`] (or the typed
//! [`MpdClient`]) and are executed strictly in submission order. Connection
//! state changes and server-side changes are fanned out through the
//! [`EventHub`].

mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
mod error;
pub mod hub;
pub mod model;
pub mod profile;
pub mod protocol;

pub use client::MpdClient;
pub use config::{BackoffConfig, ClientConfig, ConfigError};
pub use connection::{ConnectionState, ServerCapabilities, Session};
pub use dispatch::{Dispatcher, RetryPolicy, SubResult};
pub use error::{Error, Result};
pub use hub::{EventHub, ExecutionContext, HubEvent, ListenerId, ServerListener};
pub use profile::{ProfileStore, ServerProfile};
pub use protocol::{AckError, Command, CommandList, ServerVersion};
