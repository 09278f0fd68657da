use std::process::ExitCode;

use clap::Parser;
use minesweeper_server::{Board, ServerError, SessionManager, Transport, config::Cli};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

async fn run(cli: Cli) -> Result<(), ServerError> {
    let params = cli.board_params();
    let board = Board::new(params.rows, params.cols, params.bombs, params.seed)?;
    info!(
        "🧩 Board ready: {} columns by {} rows, {} bombs",
        board.cols(),
        board.rows(),
        board.bombs_remaining()
    );

    let transport = match cli.tls_paths()? {
        Some((cert, key)) => Transport::tls_from_pem_files(cert, key)?,
        None => {
            warn!("No TLS certificate configured, serving plain TCP");
            Transport::Plain
        }
    };

    let manager = SessionManager::new(cli.server_config(), board, transport);
    let addr = manager.start().await?;
    info!("🚀 Minesweeper server listening on {}", addr);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c, shutting down: {}", e);
    } else {
        info!("Received ctrl-c, shutting down");
    }

    manager.stop().await
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
