use std::io;

use derive_more::{Display, Error};

use crate::{logic::BoardError, transport::TlsError};

#[derive(Debug, Display, Error)]
pub enum ServerError {
    #[display("session manager is already running")]
    AlreadyRunning,
    #[display("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[display("listener failed: {source}")]
    Listener { source: io::Error },
    #[display("invalid board: {source}")]
    Board { source: BoardError },
    #[display("TLS setup failed: {source}")]
    Tls { source: TlsError },
    #[display("invalid configuration: {message}")]
    Config { message: String },
}

impl From<BoardError> for ServerError {
    fn from(source: BoardError) -> Self {
        Self::Board { source }
    }
}

impl From<TlsError> for ServerError {
    fn from(source: TlsError) -> Self {
        Self::Tls { source }
    }
}
