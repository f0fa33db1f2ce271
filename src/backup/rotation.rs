// serverbackup/src/backup/rotation.rs
use tracing::{debug, info};

use crate::destination::DestinationStore;
use crate::errors::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub deleted: Vec<String>,
    pub remaining: usize,
}

/// Deletes the oldest artifacts under `{prefix}{task_id}_` ending in `extension`
/// until at most `limit` remain.
///
/// Callers treat the error as housekeeping noise; it never fails a run.
pub async fn rotate(
    store: &dyn DestinationStore,
    task_id: u64,
    limit: usize,
    extension: &str,
    prefix: &str,
) -> Result<RotationReport> {
    info!(backup_task_id = task_id, backup_limit = limit, "Rotating old backups.");

    let extension = format!(".{}", extension.trim_start_matches('.'));
    let mut files: Vec<_> = store
        .list_files(&format!("{}{}_", prefix, task_id))
        .await?
        .into_iter()
        .filter(|f| f.key.ends_with(&extension))
        .collect();
    debug!(file_count = files.len(), "Files filtered and sorted.");

    let mut report = RotationReport::default();
    while files.len() > limit {
        let Some(oldest) = files.pop() else { break };
        debug!(file = %oldest.key, "Deleting old backup.");
        store.delete_file(&oldest.key).await?;
        report.deleted.push(oldest.key);
    }

    report.remaining = files.len();
    info!(remaining_files = report.remaining, "Old backups rotation completed.");
    Ok(report)
}
