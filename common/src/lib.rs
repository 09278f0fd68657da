//! Types shared between the minesweeper server and its clients.
//!
//! - [`models`] holds the player-visible view of a board ([`Tile`], [`Snapshot`]) and its
//!   text rendering.
//! - [`protocol`] holds the line protocol: [`Command`] decoding and the fixed server texts.

pub mod models;
pub mod protocol;

pub use models::{ParseSnapshotError, Pos, Snapshot, Tile};
pub use protocol::{Command, Greeting, ProtocolError};
