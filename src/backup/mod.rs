pub mod archive;
pub mod constants;
pub mod db_dump;
pub mod gate;
pub mod logic;
pub mod rotation;
pub mod transfer;

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::errors::Result;
use crate::records::TaskStatus;

pub use logic::{BackupOrchestrator, RunOutcome};

/// Starts every `ready` task concurrently and waits for all of them.
///
/// Paused and running tasks are skipped. Runs against the same server queue up on
/// the orchestrator's server gate.
pub async fn dispatch_ready_tasks(orchestrator: Arc<BackupOrchestrator>) -> Result<Vec<(u64, Result<RunOutcome>)>> {
    let tasks = orchestrator.repository().list_tasks().await?;
    let mut runs = JoinSet::new();

    for task in tasks {
        if task.status != TaskStatus::Ready {
            info!(backup_task_id = task.id, status = %task.status, "Skipping backup task.");
            continue;
        }
        let orchestrator = Arc::clone(&orchestrator);
        let task_id = task.id;
        runs.spawn(async move { (task_id, orchestrator.run_task(task_id).await) });
    }

    let mut results = Vec::new();
    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => warn!(error = %e, "Backup run aborted."),
        }
    }
    results.sort_by_key(|(id, _)| *id);
    Ok(results)
}
