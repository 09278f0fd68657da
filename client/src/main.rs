use std::path::PathBuf;

use clap::Parser;
use minesweeper_client::{Command, MinesweeperClient, Reply, Result, TlsOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Play minesweeper from the terminal.
#[derive(Parser, Debug)]
#[command(name = "minesweeper-client")]
#[command(about = "Terminal client for the multiplayer minesweeper server", long_about = None)]
#[command(version)]
struct Cli {
    /// Server address, host:port
    #[arg(env = "MINESWEEPER_ADDR", default_value = "127.0.0.1:9023")]
    addr: String,

    /// PEM file of the CA to trust; enables TLS
    #[arg(long, env = "TLS_CA")]
    tls_ca: Option<PathBuf>,

    /// Name to verify the server certificate against
    #[arg(long, env = "TLS_SERVER_NAME", default_value = "localhost")]
    server_name: String,
}

fn print_reply(reply: Reply) -> bool {
    match reply {
        Reply::Board(board) => println!("{board}"),
        Reply::Boom => println!("BOOM!"),
        Reply::Help(text) => println!("{text}"),
        Reply::Error(message) => {
            println!("server error: {message}");
            return false;
        }
    }
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut client = match &cli.tls_ca {
        Some(ca_file) => {
            let options = TlsOptions {
                ca_file: ca_file.clone(),
                server_name: cli.server_name.clone(),
            };
            MinesweeperClient::connect_tls(&cli.addr, &options).await?
        }
        None => MinesweeperClient::connect(&cli.addr).await?,
    };
    println!("{}", client.greeting());

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = input.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        // Check locally first; the server drops the session on a bad line
        let command = match Command::decode(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        match client.request(command).await? {
            Some(reply) => {
                if !print_reply(reply) {
                    return Ok(());
                }
            }
            None => break,
        }
    }

    client.close().await
}
