//! Minesweeper Client Library
//!
//! This library provides a Rust client for the minesweeper multiplayer server. It speaks the
//! server's line protocol over plain TCP or TLS and turns replies back into typed values.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use minesweeper_client::{MinesweeperClient, Pos, Reply};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut client = MinesweeperClient::connect("127.0.0.1:9023").await?;
//!     println!("{} players online", client.greeting().players);
//!
//!     // Make moves
//!     client.flag(Pos { x: 1, y: 1 }).await?;
//!     match client.dig(Pos { x: 0, y: 0 }).await? {
//!         Reply::Boom => println!("BOOM!"),
//!         Reply::Board(board) => println!("{board}"),
//!         other => println!("{other:?}"),
//!     }
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! For TLS, pass the certificate authority to trust:
//!
//! ```rust,no_run
//! use minesweeper_client::{MinesweeperClient, TlsOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let options = TlsOptions {
//!         ca_file: "ca.pem".into(),
//!         server_name: "localhost".to_string(),
//!     };
//!     let mut client = MinesweeperClient::connect_tls("127.0.0.1:9023", &options).await?;
//!     println!("{}", client.look().await?);
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod connection;

pub use client::{MinesweeperClient, Reply};
pub use connection::{BoxedStream, Stream, TlsOptions, connect};

// Re-export common types for convenience
pub use minesweeper_common::{models::*, protocol::*};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
