// serverbackup/src/backup/logic.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use chrono_tz::Tz;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::archive::ArchiveBuilder;
use super::constants::DEFAULT_REMOTE_WORK_DIR;
use super::db_dump::{DumpRequest, detect_engine, dump_database};
use super::gate::ServerGate;
use super::rotation::rotate;
use super::transfer::transfer_artifact;
use crate::config::SshSettings;
use crate::destination::{DestinationStore, StoreProvider};
use crate::errors::{BackupError, Result};
use crate::records::{
    BackupMode, BackupTask, BackupTaskLog, FailureNotice, Notifier, RemoteServer, TaskRepository, TaskStatus,
};
use crate::remote::fs_ops::{create_directory, delete_remote_directory, is_project_directory, path_exists};
use crate::remote::{RemoteSession, SessionConnector};
use crate::utils::naming::{backup_file_name, log_line, object_key, parse_timezone, rotation_pattern};
#[cfg(test)]
use crate::utils::retry::RetryPolicy;

/// How a run ended when it did not hit an unexpected fault.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        log_id: u64,
        elapsed: Duration,
        file_name: String,
    },
    /// An expected operational failure, already logged and notified.
    Failed { log_id: u64, message: String },
}

impl RunOutcome {
    pub fn log_id(&self) -> u64 {
        match self {
            RunOutcome::Completed { log_id, .. } | RunOutcome::Failed { log_id, .. } => *log_id,
        }
    }

    #[cfg(test)]
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}

/// The run's log record plus the output accumulated so far.
struct RunLog<'a> {
    repository: &'a dyn TaskRepository,
    notifier: &'a dyn Notifier,
    log: BackupTaskLog,
    output: String,
    tz: Tz,
}

impl RunLog<'_> {
    fn push(&mut self, message: &str) {
        self.output.push_str(&log_line(message, self.tz, Utc::now()));
    }

    /// Appends a line and streams the whole output to listeners.
    async fn append(&mut self, message: &str) -> Result<()> {
        self.push(message);
        self.repository.update_log_output(self.log.id, &self.output).await?;
        self.notifier.log_streamed(&self.log, &self.output).await;
        Ok(())
    }
}

/// Drives one backup task from `ready` through `running` and back.
pub struct BackupOrchestrator {
    settings: Arc<SshSettings>,
    repository: Arc<dyn TaskRepository>,
    notifier: Arc<dyn Notifier>,
    connector: Arc<dyn SessionConnector>,
    stores: Arc<dyn StoreProvider>,
    gate: ServerGate,
    archiver: ArchiveBuilder,
    remote_work_dir: String,
}

impl BackupOrchestrator {
    /// Rejects invalid SSH settings before any task is touched.
    pub fn new(
        settings: Arc<SshSettings>,
        repository: Arc<dyn TaskRepository>,
        notifier: Arc<dyn Notifier>,
        connector: Arc<dyn SessionConnector>,
        stores: Arc<dyn StoreProvider>,
    ) -> Result<Self> {
        info!("Validating configuration.");
        settings.validate()?;
        info!("Configuration validation passed.");
        Ok(Self {
            settings,
            repository,
            notifier,
            connector,
            stores,
            gate: ServerGate::new(),
            archiver: ArchiveBuilder::default(),
            remote_work_dir: DEFAULT_REMOTE_WORK_DIR.to_string(),
        })
    }

    #[cfg(test)]
    pub fn with_archive_retry(mut self, policy: RetryPolicy) -> Self {
        self.archiver = ArchiveBuilder::new(policy);
        self
    }

    pub fn with_remote_work_dir(mut self, dir: impl Into<String>) -> Self {
        let dir = dir.into();
        let trimmed = dir.trim_end_matches('/');
        self.remote_work_dir = if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() };
        self
    }

    pub fn settings(&self) -> &SshSettings {
        &self.settings
    }

    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.repository
    }

    #[cfg(test)]
    pub fn gate(&self) -> &ServerGate {
        &self.gate
    }

    /// Runs one task to completion.
    ///
    /// Operational failures come back as `Ok(RunOutcome::Failed)`. Anything else is
    /// recorded the same way and then returned as `BackupError::Unexpected`.
    /// Missing records or an unusable destination abort before any state changes.
    pub async fn run_task(&self, task_id: u64) -> Result<RunOutcome> {
        info!(backup_task_id = task_id, "Obtaining backup task.");
        let task = self.repository.find_task(task_id).await?;
        let user = self.repository.find_user(task.user_id).await?;
        let server = self.repository.find_server(task.remote_server_id).await?;
        let destination = self.repository.find_destination(task.backup_destination_id).await?;
        let store = self.stores.store_for(&destination).await?;

        if self.gate.is_busy(server.id) {
            info!(backup_task_id = task.id, remote_server_id = server.id, "Another backup is running on this server; waiting.");
        }
        let permit = self.gate.acquire(server.id).await;
        debug!(remote_server_id = permit.server_id(), "Holding server gate.");

        self.set_status(&task, TaskStatus::Running).await?;

        let tz = parse_timezone(&user.timezone);
        let started = Instant::now();
        let first_line = log_line("Backup task started.", tz, Utc::now());
        info!(backup_task_id = task.id, "Recording backup task log.");
        let log = match self.repository.create_log(task.id, &first_line).await {
            Ok(log) => log,
            Err(e) => {
                let message = e.to_string();
                error!(backup_task_id = task.id, error = %message, "Failed to create backup task log.");
                self.set_status(&task, TaskStatus::Ready).await?;
                self.send_failure_email(&task, &user.email, &message).await;
                return Err(wrap_unexpected(e));
            }
        };
        self.notifier.log_created(&log).await;

        let mut run = RunLog {
            repository: self.repository.as_ref(),
            notifier: self.notifier.as_ref(),
            log,
            output: first_line,
            tz,
        };

        let result = self.perform(&task, &server, store.as_ref(), &mut run).await;

        match result {
            Ok(file_name) => {
                let elapsed = started.elapsed();
                run.push(&format!(
                    "Backup completed successfully in {:.2} seconds.",
                    elapsed.as_secs_f64()
                ));
                let finished = self.repository.finish_log(run.log.id, &run.output, true).await;
                self.set_status(&task, TaskStatus::Ready).await?;
                let finished = match finished {
                    Ok(log) => log,
                    Err(e) => {
                        let message = e.to_string();
                        error!(backup_task_id = task.id, log_id = run.log.id, error = %message, "Failed to finalize backup task log.");
                        run.push(&message);
                        if let Err(e) = self.repository.update_log_output(run.log.id, &run.output).await {
                            warn!(log_id = run.log.id, error = %e, "Failed to record the failure in the backup task log.");
                        }
                        self.send_failure_email(&task, &user.email, &message).await;
                        return Err(wrap_unexpected(e));
                    }
                };
                self.notifier.log_streamed(&finished, &finished.output).await;
                info!(backup_task_id = task.id, elapsed_secs = elapsed.as_secs_f64(), "Backup task completed.");
                Ok(RunOutcome::Completed {
                    log_id: finished.id,
                    elapsed,
                    file_name,
                })
            }
            Err(err) => {
                let message = err.to_string();
                error!(backup_task_id = task.id, error = %message, "Handling failure for backup task.");
                run.push(&message);
                let finished = self.repository.finish_log(run.log.id, &run.output, false).await;
                self.set_status(&task, TaskStatus::Ready).await?;
                match &finished {
                    Ok(log) => self.notifier.log_streamed(log, &log.output).await,
                    Err(e) => error!(log_id = run.log.id, error = %e, "Failed to finalize backup task log."),
                }
                self.send_failure_email(&task, &user.email, &message).await;

                if err.is_domain() {
                    Ok(RunOutcome::Failed {
                        log_id: run.log.id,
                        message,
                    })
                } else {
                    Err(wrap_unexpected(err))
                }
            }
        }
    }

    async fn set_status(&self, task: &BackupTask, status: TaskStatus) -> Result<()> {
        info!(backup_task_id = task.id, %status, "Updating backup task status.");
        self.repository.update_task_status(task.id, status).await?;
        self.notifier.status_changed(task, status).await;
        Ok(())
    }

    async fn send_failure_email(&self, task: &BackupTask, recipient: &str, message: &str) {
        info!(backup_task_id = task.id, error = message, "Sending failure notification email.");
        let notice = FailureNotice {
            recipient: recipient.to_string(),
            task_label: task.label.clone(),
            error_message: message.to_string(),
        };
        if let Err(e) = self.notifier.task_failed(&notice).await {
            error!(backup_task_id = task.id, error = %e, "Failed to send task failure notification email.");
        }
    }

    /// Connects and hands off to the staged run. The session is closed on every path out.
    async fn perform(
        &self,
        task: &BackupTask,
        server: &RemoteServer,
        store: &dyn DestinationStore,
        run: &mut RunLog<'_>,
    ) -> Result<String> {
        let session = self.connector.connect(server).await?;
        let result = self.staged(session.as_ref(), task, server, store, run).await;
        session.disconnect().await;
        result
    }

    /// Works inside a per-run staging directory that is removed afterwards.
    async fn staged(
        &self,
        session: &dyn RemoteSession,
        task: &BackupTask,
        server: &RemoteServer,
        store: &dyn DestinationStore,
        run: &mut RunLog<'_>,
    ) -> Result<String> {
        self.repository.mark_server_online(server.id).await?;
        run.append(&format!("Connected to {}.", server.label)).await?;

        let staging = format!("{}/serverbackup-{}", self.remote_work_dir, Uuid::new_v4());
        create_directory(session, &staging).await?;
        let result = self.produce_and_ship(session, task, server, store, &staging, run).await;

        if let Err(e) = delete_remote_directory(session, &staging).await {
            warn!(folder_path = %staging, error = %e, "Failed to delete folder.");
        }
        result
    }

    async fn produce_and_ship(
        &self,
        session: &dyn RemoteSession,
        task: &BackupTask,
        server: &RemoteServer,
        store: &dyn DestinationStore,
        staging: &str,
        run: &mut RunLog<'_>,
    ) -> Result<String> {
        let extension = task.mode.artifact_extension();
        let file_name = backup_file_name(task.id, task.appended_file_name.as_deref(), extension, Utc::now());
        let remote_path = format!("{}/{}", staging, file_name);

        match &task.mode {
            BackupMode::Database {
                database_name,
                excluded_tables,
            } => {
                let password = server.database_password.as_deref().ok_or_else(|| {
                    BackupError::Dump(format!(
                        "No database password is stored for remote server {}.",
                        server.label
                    ))
                })?;
                let engine = detect_engine(session).await?;
                run.append(&format!("Detected {} database.", engine)).await?;

                let request = DumpRequest {
                    database_name,
                    username: server.database_username.as_deref(),
                    password,
                    excluded_tables,
                };
                dump_database(session, engine, &remote_path, &request).await?;
                run.append(&format!("Database {} dumped.", database_name)).await?;
            }
            BackupMode::Files { source_path } => {
                if !path_exists(session, source_path).await? {
                    return Err(BackupError::Archive(format!(
                        "The source path {} does not exist on the remote server.",
                        source_path
                    )));
                }
                let is_project = is_project_directory(session, source_path).await?;
                debug!(source_path = %source_path, is_project, "Project directory check.");

                self.archiver.archive(session, source_path, &remote_path).await?;
                run.append(&format!("Directory {} archived.", source_path)).await?;
            }
        }

        let key = object_key(task.store_path.as_deref(), &file_name);
        transfer_artifact(session, &remote_path, store, &key).await?;
        run.append(&format!("Backup uploaded to {} as {}.", store.name(), key)).await?;

        if task.is_rotation_enabled() {
            let prefix = object_key(
                task.store_path.as_deref(),
                &rotation_pattern(task.appended_file_name.as_deref()),
            );
            let limit = task.maximum_backups_to_keep as usize;
            match rotate(store, task.id, limit, extension, &prefix).await {
                Ok(report) if !report.deleted.is_empty() => {
                    run.append(&format!("Removed {} old backup(s).", report.deleted.len()))
                        .await?;
                }
                Ok(_) => {}
                Err(e) => error!(backup_task_id = task.id, error = %e, "Error rotating old backups."),
            }
        }

        Ok(file_name)
    }
}

fn wrap_unexpected(err: BackupError) -> BackupError {
    match err {
        BackupError::Unexpected(_) => err,
        other => BackupError::Unexpected(other.to_string()),
    }
}
