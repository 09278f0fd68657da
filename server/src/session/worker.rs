use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use derive_more::Display;
use tokio::{
    io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::oneshot,
    time,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use minesweeper_common::protocol::{self, BOOM, Command, HELP, ProtocolError};

use super::{Shared, registry::Shutdown};
use crate::{logic::Board, transport::BoxedConnection};

/// Why a session ended.
#[derive(Debug, Display)]
pub(crate) enum Exit {
    #[display("client said bye")]
    Bye,
    #[display("client closed the connection")]
    PeerClosed,
    #[display("server is shutting down")]
    Shutdown,
    #[display("undecodable command: {_0}")]
    DecodeFailed(ProtocolError),
    #[display("handshake failed: {_0}")]
    Handshake(io::Error),
    #[display("connection error: {_0}")]
    Io(io::Error),
}

impl Exit {
    fn is_clean(&self) -> bool {
        matches!(self, Exit::Bye | Exit::PeerClosed | Exit::Shutdown)
    }
}

/// One player's session. Owns the connection for its whole life.
pub(crate) struct Worker {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub shutdown: Shutdown,
    pub shared: Arc<Shared>,
}

async fn send<W: AsyncWrite + Unpin>(
    writer: &mut W,
    text: &str,
    limit: Duration,
) -> io::Result<()> {
    let mut payload = String::with_capacity(text.len() + 1);
    payload.push_str(text);
    payload.push('\n');

    time::timeout(limit, async {
        writer.write_all(payload.as_bytes()).await?;
        writer.flush().await
    })
    .await
    .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")))
}

/// Applies a command to the board. `None` means the session should end.
fn respond(board: &Board, command: Command) -> Option<String> {
    let response = match command {
        Command::Bye => return None,
        Command::Help => HELP.to_string(),
        Command::Look => board.snapshot().to_string(),
        Command::Dig { pos } => {
            if board.dig(pos.y, pos.x) {
                board.snapshot().to_string()
            } else {
                BOOM.to_string()
            }
        }
        Command::Flag { pos } => {
            board.flag(pos.y, pos.x);
            board.snapshot().to_string()
        }
        Command::Deflag { pos } => {
            board.deflag(pos.y, pos.x);
            board.snapshot().to_string()
        }
    };
    Some(response)
}

impl Worker {
    /// Runs the session to completion, then deregisters it.
    ///
    /// `registered` fires once the accept loop has put this worker's handle into the
    /// registry, so the final self-removal can never race ahead of the insertion.
    #[instrument(level = "trace", skip_all, fields(session = %self.id, peer = %self.peer))]
    pub async fn run(self, stream: TcpStream, registered: oneshot::Receiver<()>) {
        let _ = registered.await;

        let config = &self.shared.config;
        let established = tokio::select! {
            _ = self.shutdown.woken() => Err(Exit::Shutdown),
            result = time::timeout(config.io_timeout, self.shared.transport.establish(stream)) => {
                match result {
                    Ok(Ok(conn)) => Ok(conn),
                    Ok(Err(e)) => Err(Exit::Handshake(e)),
                    Err(_) => Err(Exit::Handshake(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "handshake timed out",
                    ))),
                }
            }
        };

        let exit = match established {
            Ok(conn) => self.serve(conn).await,
            Err(exit) => exit,
        };

        if exit.is_clean() {
            info!("Session {} ({}) ended: {}", self.id, self.peer, exit);
        } else {
            warn!("Session {} ({}) ended: {}", self.id, self.peer, exit);
        }

        if self.shared.registry.remove(&self.id).is_some() {
            debug!("Session {} deregistered itself", self.id);
        }
        info!(
            "Session {} closed, remaining sessions: {}",
            self.id,
            self.shared.registry.len()
        );
    }

    async fn serve(&self, conn: BoxedConnection) -> Exit {
        let Shared {
            board,
            config,
            registry,
            ..
        } = &*self.shared;

        let (reader, mut writer) = tokio::io::split(conn);
        let mut lines = BufReader::new(reader).lines();

        let welcome = protocol::greeting(registry.len(), board.rows(), board.cols());
        if let Err(e) = send(&mut writer, &welcome, config.io_timeout).await {
            return Exit::Io(e);
        }

        let exit = loop {
            if self.shutdown.is_requested() {
                break Exit::Shutdown;
            }

            let read = tokio::select! {
                _ = self.shutdown.woken() => continue,
                read = time::timeout(config.poll_interval, lines.next_line()) => read,
            };

            let line = match read {
                Err(_) => continue,
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => break Exit::PeerClosed,
                Ok(Err(e)) => break Exit::Io(e),
            };
            if line.trim().is_empty() {
                continue;
            }

            let command = match Command::decode(&line) {
                Ok(command) => command,
                Err(e) => {
                    let _ = send(&mut writer, &format!("error: {e}"), config.io_timeout).await;
                    break Exit::DecodeFailed(e);
                }
            };
            debug!("Session {} sent {}", self.id, command);

            let Some(response) = respond(board, command) else {
                break Exit::Bye;
            };
            if let Err(e) = send(&mut writer, &response, config.io_timeout).await {
                break Exit::Io(e);
            }
        };

        let _ = time::timeout(config.io_timeout, writer.shutdown()).await;
        exit
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

    use super::*;
    use crate::{
        config::ServerConfig,
        session::registry::{Registry, WorkerHandle},
        transport::Transport,
    };

    const REFERENCE_BOMBS: [(usize, usize); 10] = [
        (1, 1),
        (3, 6),
        (3, 9),
        (4, 3),
        (4, 4),
        (4, 9),
        (6, 0),
        (6, 6),
        (8, 9),
        (9, 2),
    ];

    struct Client {
        lines: Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
        writer: tokio::io::WriteHalf<DuplexStream>,
    }

    impl Client {
        async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{line}\n").as_bytes())
                .await
                .unwrap();
        }

        async fn line(&mut self) -> Option<String> {
            time::timeout(Duration::from_secs(5), self.lines.next_line())
                .await
                .unwrap()
                .unwrap()
        }

        async fn board(&mut self, rows: usize) -> String {
            let mut board = Vec::new();
            for _ in 0..rows {
                board.push(self.line().await.unwrap());
            }
            board.join("\n")
        }
    }

    fn start() -> (Client, Shutdown, tokio::task::JoinHandle<Exit>) {
        let shared = Arc::new(Shared {
            board: Arc::new(Board::from_layout(10, 10, &REFERENCE_BOMBS).unwrap()),
            transport: Transport::Plain,
            config: ServerConfig {
                poll_interval: Duration::from_millis(50),
                ..ServerConfig::default()
            },
            registry: Registry::default(),
        });
        let shutdown = Shutdown::default();
        let worker = Worker {
            id: Uuid::new_v4(),
            peer: "127.0.0.1:9".parse().unwrap(),
            shutdown: shutdown.clone(),
            shared: shared.clone(),
        };
        shared.registry.insert(
            worker.id,
            WorkerHandle {
                peer: worker.peer,
                shutdown: shutdown.clone(),
                task: tokio::spawn(async {}),
            },
        );

        let (client_side, server_side) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { worker.serve(Box::new(server_side)).await });
        let (reader, writer) = tokio::io::split(client_side);
        let client = Client {
            lines: BufReader::new(reader).lines(),
            writer,
        };
        (client, shutdown, task)
    }

    #[tokio::test]
    async fn plays_a_session() {
        let (mut client, _shutdown, task) = start();
        assert_eq!(
            client.line().await.unwrap(),
            "Welcome to Minesweeper. Players: 1 including you. Board: 10 columns by 10 rows. Type 'help' for help."
        );

        client.send("look").await;
        assert_eq!(client.board(10).await, vec!["----------"; 10].join("\n"));

        client.send("dig 9 0").await;
        assert_eq!(
            client.board(10).await,
            "--1       \n--1       \n--1  11111\n--1222----\n----------\n\
----------\n----------\n----------\n----------\n----------"
        );

        client.send("flag 0 0").await;
        assert!(client.board(10).await.starts_with("F-1"));
        client.send(r#"{"action":"deflag","pos":{"x":0,"y":0}}"#).await;
        assert!(client.board(10).await.starts_with("--1"));

        client.send("dig 9 3").await;
        assert_eq!(client.line().await.unwrap(), BOOM);

        client.send("").await;
        client.send("help").await;
        assert_eq!(client.line().await.unwrap(), HELP);

        client.send("bye").await;
        assert_eq!(client.line().await, None);
        assert!(matches!(task.await.unwrap(), Exit::Bye));
    }

    #[tokio::test]
    async fn decode_failure_ends_the_session() {
        let (mut client, _shutdown, task) = start();
        client.line().await.unwrap();

        client.send("explode 1 1").await;
        assert_eq!(
            client.line().await.unwrap(),
            r#"error: unknown command "explode""#
        );
        assert_eq!(client.line().await, None);
        assert!(matches!(task.await.unwrap(), Exit::DecodeFailed(_)));
    }

    #[tokio::test]
    async fn shutdown_interrupts_an_idle_read() {
        let (mut client, shutdown, task) = start();
        client.line().await.unwrap();

        shutdown.request();
        let exit = time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(exit, Exit::Shutdown));
        assert_eq!(client.line().await, None);
    }

    #[tokio::test]
    async fn peer_close_ends_the_session() {
        let (mut client, _shutdown, task) = start();
        client.line().await.unwrap();

        client.writer.shutdown().await.unwrap();
        assert!(matches!(task.await.unwrap(), Exit::PeerClosed));
    }

    #[test]
    fn respond_maps_commands_to_board_operations() {
        let board = Board::from_layout(2, 2, &[(0, 0)]).unwrap();
        assert_eq!(respond(&board, Command::Look).unwrap(), "--\n--");
        assert_eq!(respond(&board, Command::Bye), None);

        let pos = minesweeper_common::Pos { x: 1, y: 1 };
        assert_eq!(respond(&board, Command::Flag { pos }).unwrap(), "--\n-F");
        assert_eq!(respond(&board, Command::Dig { pos }).unwrap(), "--\n-F");
        assert_eq!(respond(&board, Command::Deflag { pos }).unwrap(), "--\n--");

        let bomb = minesweeper_common::Pos { x: 0, y: 0 };
        assert_eq!(respond(&board, Command::Dig { pos: bomb }).unwrap(), BOOM);
        assert_eq!(respond(&board, Command::Look).unwrap(), "  \n  ");
    }
}
