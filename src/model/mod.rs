//! Typed domain entities and the response parser that builds them.

mod parse;
mod types;

pub use parse::{group_records, parse_albums, parse_artists, parse_changes, FromResponse};
pub use types::*;
