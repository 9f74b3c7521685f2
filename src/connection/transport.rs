//! Byte stream to the server.
//!
//! Reads are cancel-safe: raw bytes go straight into the response decoder,
//! which keeps partial lines and partial blocks between calls. Dropping a
//! pending read (e.g. a lost `select!` branch) never loses data.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::profile::ServerProfile;
use crate::protocol::{Command, Decoded, ResponseDecoder, ServerVersion};

const READ_CHUNK: usize = 8 * 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub(crate) struct Transport {
  reader: BoxedReader,
  writer: BoxedWriter,
  decoder: ResponseDecoder,
  chunk: Box<[u8]>,
}

impl Transport {
  pub(crate) fn new<R, W>(reader: R, writer: W) -> Self
  where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
  {
    Self {
      reader: Box::new(reader),
      writer: Box::new(writer),
      decoder: ResponseDecoder::new(),
      chunk: vec![0u8; READ_CHUNK].into_boxed_slice(),
    }
  }

  /// Open a TCP connection and consume the greeting.
  pub(crate) async fn open(
    profile: &ServerProfile,
    connect_timeout: Duration,
    response_timeout: Duration,
  ) -> Result<(Self, ServerVersion)> {
    let stream = tokio::time::timeout(
      connect_timeout,
      TcpStream::connect((profile.host.as_str(), profile.port)),
    )
    .await
    .map_err(|_| Error::Timeout(connect_timeout))??;

    if let Err(e) = stream.set_nodelay(true) {
      log::debug!("Failed to set TCP_NODELAY: {}", e);
    }

    let (reader, writer) = stream.into_split();
    let mut transport = Self::new(reader, writer);
    let version = transport.handshake(response_timeout).await?;
    Ok((transport, version))
  }

  /// Read the `OK MPD x.y.z` greeting.
  pub(crate) async fn handshake(&mut self, limit: Duration) -> Result<ServerVersion> {
    let line = tokio::time::timeout(limit, self.read_line())
      .await
      .map_err(|_| Error::Timeout(limit))??;
    Ok(ServerVersion::from_greeting(&line)?)
  }

  /// Send `password`. An ACK is returned as `Error::Server`.
  pub(crate) async fn authenticate(&mut self, password: &str, limit: Duration) -> Result<()> {
    self.send(&Command::password(password).encode()).await?;
    match self.read_decoded_within(limit).await? {
      Decoded::Block(_) => Ok(()),
      Decoded::Ack(ack) => Err(Error::Server(ack)),
    }
  }

  pub(crate) async fn send(&mut self, bytes: &[u8]) -> Result<()> {
    self.writer.write_all(bytes).await?;
    self.writer.flush().await?;
    Ok(())
  }

  /// Next complete response unit. No timeout; cancel-safe.
  pub(crate) async fn read_decoded(&mut self) -> Result<Decoded> {
    loop {
      if let Some(decoded) = self.decoder.next_block()? {
        return Ok(decoded);
      }
      self.fill().await?;
    }
  }

  pub(crate) async fn read_decoded_within(&mut self, limit: Duration) -> Result<Decoded> {
    tokio::time::timeout(limit, self.read_decoded())
      .await
      .map_err(|_| Error::Timeout(limit))?
  }

  async fn read_line(&mut self) -> Result<String> {
    loop {
      if let Some(line) = self.decoder.next_line() {
        return Ok(line);
      }
      self.fill().await?;
    }
  }

  async fn fill(&mut self) -> Result<()> {
    let n = self.reader.read(&mut self.chunk).await?;
    if n == 0 {
      return Err(Error::Transport(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "server closed the connection",
      )));
    }
    self.decoder.feed(&self.chunk[..n])?;
    Ok(())
  }
}
