//! MPD wire protocol: command encoding and response decoding.
//!
//! Architecture:
//! - `command.rs` - Command/CommandList types, argument quoting
//! - `codec.rs` - Restartable response decoder, ACK errors, greeting parsing
//!
//! Reference: https://mpd.readthedocs.io/en/latest/protocol.html

mod codec;
mod command;

pub use codec::{
  AckCode, AckError, Decoded, ProtocolError, ResponseBlock, ResponseDecoder, ServerVersion,
  Terminator, MAX_LINE_LENGTH,
};
pub use command::{split_arguments, Command, CommandList};
