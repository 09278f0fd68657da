use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use clap::Parser;

use crate::error::ServerError;

/// Runtime settings of a [`SessionManager`](crate::session::SessionManager).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on, `host:port`.
    pub bind: String,
    /// Longest a worker or the accept loop waits before re-checking for shutdown.
    pub poll_interval: Duration,
    /// Limit for a TLS handshake and for writing one response.
    pub io_timeout: Duration,
    /// How long `stop` waits for workers before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9023".to_string(),
            poll_interval: Duration::from_millis(1000),
            io_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardParams {
    pub rows: usize,
    pub cols: usize,
    pub bombs: usize,
    pub seed: u64,
}

/// Command line of the server binary. Every flag can also come from the environment.
#[derive(Parser, Debug)]
#[command(name = "minesweeper-server")]
#[command(about = "Multiplayer minesweeper server", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Host to bind to
    #[arg(long, env = "MINESWEEPER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind to
    #[arg(short, long, env = "MINESWEEPER_PORT", default_value_t = 9023)]
    pub port: u16,

    /// Board height
    #[arg(long, env = "BOARD_ROWS", default_value_t = 10)]
    pub rows: usize,

    /// Board width
    #[arg(long, env = "BOARD_COLS", default_value_t = 10)]
    pub cols: usize,

    /// Number of bombs on the board
    #[arg(long, env = "BOARD_BOMBS", default_value_t = 10)]
    pub bombs: usize,

    /// Seed for bomb placement, defaults to the current time
    #[arg(long, env = "BOARD_SEED")]
    pub seed: Option<u64>,

    /// PEM certificate chain; requires --tls-key
    #[arg(long, env = "TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key; requires --tls-cert
    #[arg(long, env = "TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Shutdown polling interval for idle connections, in milliseconds
    #[arg(long, env = "WORKER_POLL_INTERVAL_MS", default_value_t = 1000,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_ms: u64,

    /// Timeout for TLS handshakes and response writes, in seconds
    #[arg(long, env = "IO_TIMEOUT_SECONDS", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub io_timeout_secs: u64,

    /// Time given to sessions to finish on shutdown, in seconds
    #[arg(long, env = "SHUTDOWN_GRACE_SECONDS", default_value_t = 5)]
    pub shutdown_grace_secs: u64,
}

impl Cli {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: format!("{}:{}", self.host, self.port),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            io_timeout: Duration::from_secs(self.io_timeout_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }

    pub fn board_params(&self) -> BoardParams {
        let seed = self.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or(0)
        });

        BoardParams {
            rows: self.rows,
            cols: self.cols,
            bombs: self.bombs,
            seed,
        }
    }

    /// The certificate and key paths, if TLS is configured. Only one of the two is an error.
    pub fn tls_paths(&self) -> Result<Option<(&Path, &Path)>, ServerError> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Ok(Some((cert.as_path(), key.as_path()))),
            (None, None) => Ok(None),
            _ => Err(ServerError::Config {
                message: "TLS requires both --tls-cert and --tls-key".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_classic_board() {
        let cli = Cli::try_parse_from(["minesweeper-server", "--seed", "4"]).unwrap();
        assert_eq!(
            cli.board_params(),
            BoardParams {
                rows: 10,
                cols: 10,
                bombs: 10,
                seed: 4
            }
        );
        let config = cli.server_config();
        assert_eq!(config.bind, "0.0.0.0:9023");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(cli.tls_paths().unwrap().is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "minesweeper-server",
            "--host",
            "127.0.0.1",
            "-p",
            "4444",
            "--rows",
            "16",
            "--cols",
            "30",
            "--bombs",
            "99",
            "--poll-interval-ms",
            "250",
        ])
        .unwrap();
        assert_eq!(cli.server_config().bind, "127.0.0.1:4444");
        assert_eq!(cli.server_config().poll_interval, Duration::from_millis(250));
        let params = cli.board_params();
        assert_eq!((params.rows, params.cols, params.bombs), (16, 30, 99));
    }

    #[test]
    fn tls_needs_both_paths() {
        let cli = Cli::try_parse_from(["minesweeper-server", "--tls-cert", "cert.pem"]).unwrap();
        assert!(matches!(cli.tls_paths(), Err(ServerError::Config { .. })));

        let cli = Cli::try_parse_from([
            "minesweeper-server",
            "--tls-cert",
            "cert.pem",
            "--tls-key",
            "key.pem",
        ])
        .unwrap();
        let (cert, key) = cli.tls_paths().unwrap().unwrap();
        assert_eq!(cert, Path::new("cert.pem"));
        assert_eq!(key, Path::new("key.pem"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        assert!(Cli::try_parse_from(["minesweeper-server", "--poll-interval-ms", "0"]).is_err());
    }
}
