//! Domain records the backup engine reads and mutates.
//!
//! Persistence lives behind [`TaskRepository`]; notification delivery behind [`Notifier`].

pub mod notify;
pub mod store;

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::backup::constants::{DRIVER_CUSTOM_S3, DRIVER_LOCAL, DRIVER_S3};

pub use notify::{FailureNotice, Notifier, TracingNotifier};
pub use store::{InMemoryRepository, TaskRepository, set_task_paused};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Ready,
    Running,
    Paused,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ready" => Some(TaskStatus::Ready),
            "running" => Some(TaskStatus::Running),
            "paused" => Some(TaskStatus::Paused),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly one of these is active per task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupMode {
    Database {
        database_name: String,
        excluded_tables: Vec<String>,
    },
    Files {
        source_path: String,
    },
}

impl BackupMode {
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            BackupMode::Database { .. } => "sql",
            BackupMode::Files { .. } => "zip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteServer {
    pub id: u64,
    pub label: String,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub database_username: Option<String>,
    pub database_password: Option<String>,
    pub online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    S3,
    CustomS3,
    Local,
}

impl DestinationKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            DRIVER_S3 => Some(DestinationKind::S3),
            DRIVER_CUSTOM_S3 => Some(DestinationKind::CustomS3),
            DRIVER_LOCAL => Some(DestinationKind::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupDestination {
    pub id: u64,
    pub label: String,
    pub kind: DestinationKind,
    pub s3_bucket_name: Option<String>,
    pub s3_region: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub custom_s3_endpoint: Option<String>,
    pub use_path_style_endpoint: bool,
    pub local_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTask {
    pub id: u64,
    pub user_id: u64,
    pub remote_server_id: u64,
    pub backup_destination_id: u64,
    pub label: String,
    pub mode: BackupMode,
    pub store_path: Option<String>,
    /// Zero keeps every artifact.
    pub maximum_backups_to_keep: u32,
    pub status: TaskStatus,
    pub appended_file_name: Option<String>,
}

impl BackupTask {
    pub fn is_paused(&self) -> bool {
        self.status == TaskStatus::Paused
    }

    pub fn pause(&mut self) {
        self.status = TaskStatus::Paused;
    }

    pub fn resume(&mut self) {
        if self.is_paused() {
            self.status = TaskStatus::Ready;
        }
    }

    pub fn is_rotation_enabled(&self) -> bool {
        self.maximum_backups_to_keep > 0
    }
}

/// Textual output of one execution of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTaskLog {
    pub id: u64,
    pub backup_task_id: u64,
    pub output: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub successful_at: Option<DateTime<Utc>>,
}

impl BackupTaskLog {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Everything loaded from configuration that the repository serves.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub users: Vec<User>,
    pub remote_servers: Vec<RemoteServer>,
    pub backup_destinations: Vec<BackupDestination>,
    pub backup_tasks: Vec<BackupTask>,
}
