use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use tokio::{sync::Notify, task::JoinHandle};
use uuid::Uuid;

/// Cancellation flag plus a wake-up for a worker blocked on its connection.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Shutdown {
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        // notify_one keeps a permit when nobody is waiting yet, so the signal is never lost
        self.wake.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub async fn woken(&self) {
        self.wake.notified().await;
    }
}

#[derive(Debug)]
pub struct WorkerHandle {
    pub peer: SocketAddr,
    pub shutdown: Shutdown,
    pub task: JoinHandle<()>,
}

/// Live workers keyed by session id.
///
/// The accept loop inserts, a worker removes itself when it ends, and `stop` drains
/// whatever is left. Whoever removes an entry first owns it.
#[derive(Debug, Default)]
pub struct Registry {
    workers: DashMap<Uuid, WorkerHandle>,
}

impl Registry {
    pub fn insert(&self, id: Uuid, handle: WorkerHandle) {
        self.workers.insert(id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<WorkerHandle> {
        self.workers.remove(id).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Removes and returns every registered worker.
    pub fn drain(&self) -> Vec<(Uuid, WorkerHandle)> {
        let ids: Vec<Uuid> = self.workers.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.workers.remove(&id))
            .collect()
    }

    pub fn request_shutdown_all(&self) {
        for entry in self.workers.iter() {
            entry.value().shutdown.request();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> WorkerHandle {
        WorkerHandle {
            peer: "127.0.0.1:1".parse().unwrap(),
            shutdown: Shutdown::default(),
            task: tokio::spawn(async {}),
        }
    }

    #[tokio::test]
    async fn entries_are_removed_exactly_once() {
        let registry = Registry::default();
        let id = Uuid::new_v4();
        registry.insert(id, handle());
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn drain_empties_the_registry() {
        let registry = Registry::default();
        for _ in 0..5 {
            registry.insert(Uuid::new_v4(), handle());
        }
        registry.request_shutdown_all();

        let drained = registry.drain();
        assert_eq!(drained.len(), 5);
        assert!(drained.iter().all(|(_, handle)| handle.shutdown.is_requested()));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn shutdown_wakes_a_later_waiter() {
        let shutdown = Shutdown::default();
        shutdown.request();
        tokio::time::timeout(std::time::Duration::from_secs(1), shutdown.woken())
            .await
            .unwrap();
        assert!(shutdown.is_requested());
    }
}
