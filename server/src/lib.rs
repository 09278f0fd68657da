//! Multiplayer minesweeper server.
//!
//! One [`Board`](logic::Board) is shared by every connected player. The
//! [`SessionManager`](session::SessionManager) accepts connections, runs one worker task per
//! player and tears everything down again on [`stop`](session::SessionManager::stop).

pub mod config;
pub mod data;
pub mod error;
pub mod logic;
pub mod session;
pub mod transport;

pub use error::ServerError;
pub use logic::{Board, BoardError};
pub use session::{Phase, SessionManager};
pub use transport::Transport;
