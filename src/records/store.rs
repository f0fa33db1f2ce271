// serverbackup/src/records/store.rs
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{BackupDestination, BackupTask, BackupTaskLog, Inventory, RemoteServer, TaskStatus, User};
use crate::errors::{BackupError, Result};

/// Create / find-or-fail / update access to the records a backup run touches.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find_task(&self, id: u64) -> Result<BackupTask>;
    async fn list_tasks(&self) -> Result<Vec<BackupTask>>;
    async fn find_user(&self, id: u64) -> Result<User>;
    async fn find_server(&self, id: u64) -> Result<RemoteServer>;
    async fn find_destination(&self, id: u64) -> Result<BackupDestination>;

    async fn update_task_status(&self, id: u64, status: TaskStatus) -> Result<()>;
    async fn mark_server_online(&self, id: u64) -> Result<()>;

    async fn create_log(&self, task_id: u64, output: &str) -> Result<BackupTaskLog>;
    /// Replaces the output of a log that is still open.
    async fn update_log_output(&self, log_id: u64, output: &str) -> Result<()>;
    /// The single final write; afterwards the log is immutable.
    async fn finish_log(&self, log_id: u64, output: &str, successful: bool) -> Result<BackupTaskLog>;
    async fn logs_for_task(&self, task_id: u64) -> Result<Vec<BackupTaskLog>>;
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<u64, User>,
    servers: HashMap<u64, RemoteServer>,
    destinations: HashMap<u64, BackupDestination>,
    tasks: BTreeMap<u64, BackupTask>,
    logs: BTreeMap<u64, BackupTaskLog>,
    next_log_id: u64,
}

/// Process-local repository seeded from the configuration inventory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn from_inventory(inventory: Inventory) -> Self {
        let tables = Tables {
            users: inventory.users.into_iter().map(|u| (u.id, u)).collect(),
            servers: inventory.remote_servers.into_iter().map(|s| (s.id, s)).collect(),
            destinations: inventory
                .backup_destinations
                .into_iter()
                .map(|d| (d.id, d))
                .collect(),
            tasks: inventory.backup_tasks.into_iter().map(|t| (t.id, t)).collect(),
            logs: BTreeMap::new(),
            next_log_id: 1,
        };
        Self {
            tables: RwLock::new(tables),
        }
    }
}

fn not_found(kind: &'static str, id: u64) -> BackupError {
    BackupError::RecordNotFound { kind, id }
}

/// Pauses or resumes a task. Returns the new status, or `None` when nothing changed.
///
/// Resuming only applies to paused tasks.
pub async fn set_task_paused(repository: &dyn TaskRepository, task_id: u64, paused: bool) -> Result<Option<TaskStatus>> {
    let mut task = repository.find_task(task_id).await?;
    let before = task.status;
    if paused {
        task.pause();
    } else {
        task.resume();
    }
    if task.status == before {
        return Ok(None);
    }
    repository.update_task_status(task.id, task.status).await?;
    Ok(Some(task.status))
}

#[async_trait]
impl TaskRepository for InMemoryRepository {
    async fn find_task(&self, id: u64) -> Result<BackupTask> {
        self.tables
            .read()
            .await
            .tasks
            .get(&id)
            .cloned()
            .ok_or(BackupError::TaskNotFound(id))
    }

    async fn list_tasks(&self) -> Result<Vec<BackupTask>> {
        Ok(self.tables.read().await.tasks.values().cloned().collect())
    }

    async fn find_user(&self, id: u64) -> Result<User> {
        self.tables
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("User", id))
    }

    async fn find_server(&self, id: u64) -> Result<RemoteServer> {
        self.tables
            .read()
            .await
            .servers
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Remote server", id))
    }

    async fn find_destination(&self, id: u64) -> Result<BackupDestination> {
        self.tables
            .read()
            .await
            .destinations
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Backup destination", id))
    }

    async fn update_task_status(&self, id: u64, status: TaskStatus) -> Result<()> {
        let mut tables = self.tables.write().await;
        let task = tables.tasks.get_mut(&id).ok_or(BackupError::TaskNotFound(id))?;
        task.status = status;
        debug!(backup_task_id = id, %status, "Task status updated.");
        Ok(())
    }

    async fn mark_server_online(&self, id: u64) -> Result<()> {
        let mut tables = self.tables.write().await;
        let server = tables
            .servers
            .get_mut(&id)
            .ok_or_else(|| not_found("Remote server", id))?;
        server.online = true;
        Ok(())
    }

    async fn create_log(&self, task_id: u64, output: &str) -> Result<BackupTaskLog> {
        let mut tables = self.tables.write().await;
        if !tables.tasks.contains_key(&task_id) {
            return Err(BackupError::TaskNotFound(task_id));
        }
        let id = tables.next_log_id;
        tables.next_log_id += 1;
        let log = BackupTaskLog {
            id,
            backup_task_id: task_id,
            output: output.to_string(),
            created_at: Utc::now(),
            finished_at: None,
            successful_at: None,
        };
        tables.logs.insert(id, log.clone());
        debug!(log_id = id, backup_task_id = task_id, "Backup task log created.");
        Ok(log)
    }

    async fn update_log_output(&self, log_id: u64, output: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let log = tables
            .logs
            .get_mut(&log_id)
            .ok_or_else(|| not_found("Backup task log", log_id))?;
        if log.is_finished() {
            return Err(BackupError::Repository(format!(
                "backup task log {} is already finalized",
                log_id
            )));
        }
        log.output = output.to_string();
        Ok(())
    }

    async fn finish_log(&self, log_id: u64, output: &str, successful: bool) -> Result<BackupTaskLog> {
        let mut tables = self.tables.write().await;
        let log = tables
            .logs
            .get_mut(&log_id)
            .ok_or_else(|| not_found("Backup task log", log_id))?;
        if log.is_finished() {
            return Err(BackupError::Repository(format!(
                "backup task log {} is already finalized",
                log_id
            )));
        }
        let now = Utc::now();
        log.output = output.to_string();
        log.finished_at = Some(now);
        if successful {
            log.successful_at = Some(now);
        }
        Ok(log.clone())
    }

    async fn logs_for_task(&self, task_id: u64) -> Result<Vec<BackupTaskLog>> {
        Ok(self
            .tables
            .read()
            .await
            .logs
            .values()
            .filter(|log| log.backup_task_id == task_id)
            .cloned()
            .collect())
    }
}
