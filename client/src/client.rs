use minesweeper_common::{Command, Greeting, Pos, Snapshot, protocol::BOOM};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, ReadHalf},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    Result,
    connection::{self, BoxedStream, Stream, TlsOptions},
};

/// What the server answered to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Board(Snapshot),
    Boom,
    Help(String),
    /// The server rejected the command and is closing the session.
    Error(String),
}

/// Client for one minesweeper session
pub struct MinesweeperClient {
    sender: mpsc::UnboundedSender<Command>,
    lines: Lines<BufReader<ReadHalf<BoxedStream>>>,
    writer_task: JoinHandle<()>,
    greeting: Greeting,
}

impl MinesweeperClient {
    /// Connect over plain TCP
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::from_stream(connection::connect(addr, None).await?).await
    }

    /// Connect over TLS, trusting the authorities in `options`
    pub async fn connect_tls(addr: &str, options: &TlsOptions) -> Result<Self> {
        Self::from_stream(connection::connect(addr, Some(options)).await?).await
    }

    /// Start a session on an already open stream. Waits for the server's greeting.
    pub async fn from_stream(stream: impl Stream + 'static) -> Result<Self> {
        let stream: BoxedStream = Box::new(stream);
        let (reader, writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        let line = lines
            .next_line()
            .await?
            .ok_or("connection closed before the greeting")?;
        let greeting =
            Greeting::parse(&line).ok_or_else(|| format!("unexpected greeting: {line}"))?;
        info!(
            "Joined a {}x{} board with {} players",
            greeting.cols, greeting.rows, greeting.players
        );

        let (sender, mut receiver) = mpsc::unbounded_channel::<Command>();

        // Writer task handles all outgoing commands
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(command) = receiver.recv().await {
                debug!("Sending command: {}", command);
                let line = format!("{command}\n");
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    warn!("Failed to send command: {}", e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    warn!("Failed to flush command: {}", e);
                    break;
                }
            }

            let _ = writer.shutdown().await;
        });

        Ok(Self {
            sender,
            lines,
            writer_task,
            greeting,
        })
    }

    pub fn greeting(&self) -> Greeting {
        self.greeting
    }

    /// Get a cloneable sender for queueing commands
    pub fn get_sender(&self) -> mpsc::UnboundedSender<Command> {
        self.sender.clone()
    }

    /// Queue a command without waiting for the answer
    pub fn send(&self, command: Command) -> Result<()> {
        self.sender
            .send(command)
            .map_err(|_| "command channel closed")?;
        Ok(())
    }

    /// Next raw line from the server. `None` once the server closed the connection.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }

    async fn expect_line(&mut self) -> Result<String> {
        Ok(self
            .read_line()
            .await?
            .ok_or("connection closed mid-reply")?)
    }

    /// Read a full board, the first line of which has already been read.
    async fn finish_board(&mut self, first: String) -> Result<Snapshot> {
        let mut text = first;
        for _ in 1..self.greeting.rows {
            text.push('\n');
            text.push_str(&self.expect_line().await?);
        }
        Ok(text.parse()?)
    }

    pub async fn read_board(&mut self) -> Result<Snapshot> {
        let first = self.expect_line().await?;
        self.finish_board(first).await
    }

    /// Send `command` and wait for its answer. `bye` has none.
    pub async fn request(&mut self, command: Command) -> Result<Option<Reply>> {
        self.send(command)?;
        if command == Command::Bye {
            return Ok(None);
        }

        let first = self.expect_line().await?;
        let reply = if command == Command::Help {
            Reply::Help(first)
        } else if first == BOOM {
            Reply::Boom
        } else if let Some(message) = first.strip_prefix("error: ") {
            Reply::Error(message.to_string())
        } else {
            Reply::Board(self.finish_board(first).await?)
        };
        Ok(Some(reply))
    }

    pub async fn look(&mut self) -> Result<Snapshot> {
        match self.request(Command::Look).await? {
            Some(Reply::Board(board)) => Ok(board),
            other => Err(format!("unexpected reply to look: {other:?}").into()),
        }
    }

    pub async fn help(&mut self) -> Result<String> {
        match self.request(Command::Help).await? {
            Some(Reply::Help(text)) => Ok(text),
            other => Err(format!("unexpected reply to help: {other:?}").into()),
        }
    }

    pub async fn dig(&mut self, pos: Pos) -> Result<Reply> {
        self.answer(Command::Dig { pos }).await
    }

    pub async fn flag(&mut self, pos: Pos) -> Result<Reply> {
        self.answer(Command::Flag { pos }).await
    }

    pub async fn deflag(&mut self, pos: Pos) -> Result<Reply> {
        self.answer(Command::Deflag { pos }).await
    }

    async fn answer(&mut self, command: Command) -> Result<Reply> {
        Ok(self
            .request(command)
            .await?
            .ok_or("no reply from server")?)
    }

    /// Close the connection once every queued command has been written
    pub async fn close(self) -> Result<()> {
        // Dropping the sender ends the writer task
        drop(self.sender);
        let _ = self.writer_task.await;

        Ok(())
    }
}
