// serverbackup/src/records/notify.rs
use async_trait::async_trait;
use tracing::{debug, info};

use super::{BackupTask, BackupTaskLog, TaskStatus};
use crate::errors::Result;

/// Payload of the failure email for the task owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureNotice {
    pub recipient: String,
    pub task_label: String,
    pub error_message: String,
}

/// Outbound events published while a task runs. Delivery (mail, websockets,
/// webhooks) is handled by whoever implements this.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn status_changed(&self, task: &BackupTask, status: TaskStatus);
    async fn log_created(&self, log: &BackupTaskLog);
    async fn log_streamed(&self, log: &BackupTaskLog, output: &str);
    async fn task_failed(&self, notice: &FailureNotice) -> Result<()>;
}

/// Writes every event to the operator log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn status_changed(&self, task: &BackupTask, status: TaskStatus) {
        info!(backup_task_id = task.id, %status, "Backup task status changed.");
    }

    async fn log_created(&self, log: &BackupTaskLog) {
        debug!(log_id = log.id, backup_task_id = log.backup_task_id, "Backup task log created.");
    }

    async fn log_streamed(&self, log: &BackupTaskLog, output: &str) {
        debug!(log_id = log.id, bytes = output.len(), "Backup task log streamed.");
    }

    async fn task_failed(&self, notice: &FailureNotice) -> Result<()> {
        info!(
            recipient = %notice.recipient,
            task = %notice.task_label,
            error = %notice.error_message,
            "Backup task failure notice emitted."
        );
        Ok(())
    }
}
