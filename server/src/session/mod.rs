//! Accepting players and running their sessions.
//!
//! A [`SessionManager`] owns a listener task and one worker task per connected player.
//! All of them share a single [`Board`]. `start` and `stop` may be called any number of
//! times and from any task; the manager moves through [`Phase`]s as they run.

mod registry;
mod worker;

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use derive_more::Display;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{Mutex, oneshot, watch},
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub use registry::{Registry, Shutdown, WorkerHandle};

use crate::{config::ServerConfig, error::ServerError, logic::Board, transport::Transport};
use worker::Worker;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Phase {
    Stopped,
    Running,
    Stopping,
}

/// State every task of a running manager can see.
pub(crate) struct Shared {
    pub board: Arc<Board>,
    pub transport: Transport,
    pub config: ServerConfig,
    pub registry: Registry,
}

struct Running {
    local_addr: SocketAddr,
    shutdown: Shutdown,
    accept: JoinHandle<Result<(), ServerError>>,
}

struct Inner {
    shared: Arc<Shared>,
    lifecycle: Mutex<Option<Running>>,
    phase: watch::Sender<Phase>,
}

/// Cheap to clone. All clones control the same server.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(config: ServerConfig, board: Board, transport: Transport) -> Self {
        let (phase, _) = watch::channel(Phase::Stopped);
        Self {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared {
                    board: Arc::new(board),
                    transport,
                    config,
                    registry: Registry::default(),
                }),
                lifecycle: Mutex::new(None),
                phase,
            }),
        }
    }

    /// Binds the configured address and starts accepting players.
    ///
    /// Returns the bound address, which differs from the configured one when port 0 was
    /// asked for.
    #[instrument(level = "trace", skip(self))]
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let shared = &self.inner.shared;
        let listener = TcpListener::bind(&shared.config.bind)
            .await
            .map_err(|source| ServerError::Bind {
                addr: shared.config.bind.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Listener { source })?;

        let shutdown = Shutdown::default();
        let accept = tokio::spawn(accept_loop(listener, shared.clone(), shutdown.clone()));
        *lifecycle = Some(Running {
            local_addr,
            shutdown,
            accept,
        });
        self.inner.phase.send_replace(Phase::Running);

        info!(
            "Listening on {} ({})",
            local_addr,
            if shared.transport.is_tls() { "TLS" } else { "plain TCP" }
        );
        Ok(local_addr)
    }

    /// Stops accepting, signals every session and waits for them to finish.
    ///
    /// Sessions still running after the shutdown grace period are aborted, and this waits
    /// until they are gone. Calling this on a stopped manager does nothing. A listener
    /// failure that ended the accept loop early is reported here.
    #[instrument(level = "trace", skip(self))]
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let Some(running) = lifecycle.take() else {
            debug!("Stop requested while already stopped");
            return Ok(());
        };
        self.inner.phase.send_replace(Phase::Stopping);
        info!("Stopping server on {}", running.local_addr);

        running.shutdown.request();
        let accepted = match running.accept.await {
            Ok(result) => result,
            Err(e) => {
                error!("Accept loop task failed: {}", e);
                Ok(())
            }
        };

        // The accept loop is gone, so nothing can be registered behind our back any more.
        let shared = &self.inner.shared;
        let workers = shared.registry.drain();
        info!("Signalling {} active sessions", workers.len());
        for (_, handle) in &workers {
            handle.shutdown.request();
        }

        let deadline = Instant::now() + shared.config.shutdown_grace;
        for (id, mut handle) in workers {
            if time::timeout_at(deadline, &mut handle.task).await.is_err() {
                warn!(
                    "Session {} ({}) did not finish in time, aborting",
                    id, handle.peer
                );
                handle.task.abort();
                // Resolves once the task is dropped, taking its connection with it
                if let Err(e) = handle.task.await
                    && !e.is_cancelled()
                {
                    error!("Session {} failed while being aborted: {}", id, e);
                }
            }
        }

        self.inner.phase.send_replace(Phase::Stopped);
        info!("Server stopped");
        accepted
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    /// Receiver that observes every phase change.
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.inner.phase.subscribe()
    }

    pub fn session_count(&self) -> usize {
        self.inner.shared.registry.len()
    }

    pub fn board(&self) -> Arc<Board> {
        self.inner.shared.board.clone()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .lifecycle
            .lock()
            .await
            .as_ref()
            .map(|running| running.local_addr)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(running) = self.lifecycle.get_mut().take() {
            debug!("Session manager dropped while running, signalling all tasks");
            running.shutdown.request();
            self.shared.registry.request_shutdown_all();
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    !matches!(
        e.kind(),
        io::ErrorKind::InvalidInput
            | io::ErrorKind::NotConnected
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::Unsupported
    )
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown: Shutdown,
) -> Result<(), ServerError> {
    loop {
        if shutdown.is_requested() {
            break;
        }

        let accepted = tokio::select! {
            _ = shutdown.woken() => continue,
            accepted = time::timeout(shared.config.poll_interval, listener.accept()) => accepted,
        };

        match accepted {
            Err(_) => continue,
            Ok(Ok((stream, peer))) => spawn_worker(&shared, stream, peer),
            Ok(Err(e)) if is_transient(&e) => {
                warn!("Failed to accept connection: {}", e);
                time::sleep(ACCEPT_BACKOFF).await;
            }
            Ok(Err(e)) => {
                error!("Listener failed, no longer accepting: {}", e);
                return Err(ServerError::Listener { source: e });
            }
        }
    }

    debug!("Accept loop finished, closing listener");
    Ok(())
}

fn spawn_worker(shared: &Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", peer, e);
    }

    let id = Uuid::new_v4();
    let shutdown = Shutdown::default();
    let (registered, on_registered) = oneshot::channel();
    let worker = Worker {
        id,
        peer,
        shutdown: shutdown.clone(),
        shared: shared.clone(),
    };

    let task = tokio::spawn(worker.run(stream, on_registered));
    shared.registry.insert(
        id,
        WorkerHandle {
            peer,
            shutdown,
            task,
        },
    );
    let _ = registered.send(());

    info!(
        "Accepted {} as session {}, {} sessions active",
        peer,
        id,
        shared.registry.len()
    );
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(
            ServerConfig {
                bind: "127.0.0.1:0".to_string(),
                poll_interval: Duration::from_millis(50),
                shutdown_grace: Duration::from_secs(2),
                ..ServerConfig::default()
            },
            Board::new(5, 5, 3, 1).unwrap(),
            Transport::Plain,
        )
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let manager = manager();
        assert_eq!(manager.phase(), Phase::Stopped);

        let addr = manager.start().await.unwrap();
        assert_eq!(manager.phase(), Phase::Running);
        assert_eq!(manager.local_addr().await, Some(addr));
        assert!(matches!(
            manager.start().await,
            Err(ServerError::AlreadyRunning)
        ));

        manager.stop().await.unwrap();
        assert_eq!(manager.phase(), Phase::Stopped);
        assert_eq!(manager.local_addr().await, None);
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn bind_failure_leaves_manager_stopped() {
        let first = manager();
        let addr = first.start().await.unwrap();

        let second = SessionManager::new(
            ServerConfig {
                bind: addr.to_string(),
                ..ServerConfig::default()
            },
            Board::new(2, 2, 0, 0).unwrap(),
            Transport::Plain,
        );
        assert!(matches!(
            second.start().await,
            Err(ServerError::Bind { .. })
        ));
        assert_eq!(second.phase(), Phase::Stopped);

        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_closes_live_sessions() {
        let manager = manager();
        let addr = manager.start().await.unwrap();

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let greeting = lines.next_line().await.unwrap().unwrap();
        assert!(greeting.contains("Players: 1 including you"));
        assert_eq!(manager.session_count(), 1);

        writer.write_all(b"look\n").await.unwrap();
        for _ in 0..5 {
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "-----");
        }

        let mut phases = manager.watch_phase();
        manager.stop().await.unwrap();
        assert_eq!(*phases.borrow_and_update(), Phase::Stopped);
        assert_eq!(manager.session_count(), 0);
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn stop_releases_sessions_stuck_past_the_grace_period() {
        let manager = SessionManager::new(
            ServerConfig {
                bind: "127.0.0.1:0".to_string(),
                poll_interval: Duration::from_millis(50),
                io_timeout: Duration::from_secs(30),
                shutdown_grace: Duration::from_millis(200),
            },
            Board::new(200, 200, 0, 0).unwrap(),
            Transport::Plain,
        );
        let addr = manager.start().await.unwrap();

        // Every reply is a 200 row board and nobody reads them, so the worker ends up
        // blocked in a write long before it runs out of commands.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&b"look\n".repeat(2000)).await.unwrap();
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(manager.session_count(), 1);

        time::timeout(Duration::from_secs(5), manager.stop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(manager.session_count(), 0);
        assert_eq!(Arc::strong_count(&manager.inner.shared), 1);
        drop(stream);
    }

    #[test]
    fn fatal_accept_errors_are_not_retried() {
        assert!(is_transient(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Other)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
        assert!(!is_transient(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }
}
