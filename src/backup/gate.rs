// serverbackup/src/backup/gate.rs
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// At most one active run per remote server. Later runs for the same server wait.
#[derive(Debug, Default)]
pub struct ServerGate {
    locks: DashMap<u64, Arc<Mutex<()>>>,
}

/// Held for the whole run; dropping it lets the next run on the server start.
#[derive(Debug)]
pub struct ServerPermit {
    server_id: u64,
    _guard: OwnedMutexGuard<()>,
}

impl ServerPermit {
    pub fn server_id(&self) -> u64 {
        self.server_id
    }
}

impl ServerGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, server_id: u64) -> ServerPermit {
        let lock = self
            .locks
            .entry(server_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        debug!(remote_server_id = server_id, "Waiting for server gate.");
        let guard = lock.lock_owned().await;
        debug!(remote_server_id = server_id, "Server gate acquired.");
        ServerPermit {
            server_id,
            _guard: guard,
        }
    }

    /// True while some run holds the server.
    pub fn is_busy(&self, server_id: u64) -> bool {
        self.locks
            .get(&server_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}
