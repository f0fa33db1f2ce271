// serverbackup/src/config/mod.rs
use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::backup::constants::{DEFAULT_REMOTE_WORK_DIR, DRIVER_CUSTOM_S3};
use crate::errors::BackupError;
use crate::records::{
    BackupDestination, BackupMode, BackupTask, DestinationKind, Inventory, RemoteServer, TaskStatus, User,
};

const DEFAULT_PRIVATE_KEY_PATH: &str = "ssh/id_ed25519";
const DEFAULT_ENVIRONMENT: &str = "production";
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_TIMEZONE: &str = "UTC";

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonUser {
    pub id: u64,
    pub name: Option<String>,
    pub email: String,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRemoteServer {
    pub id: u64,
    pub label: Option<String>,
    #[serde(alias = "ip_address")]
    pub address: String,
    pub port: Option<u16>,
    pub username: String,
    pub database_username: Option<String>,
    pub database_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonBackupDestination {
    pub id: u64,
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub s3_bucket_name: Option<String>,
    pub s3_region: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub custom_s3_endpoint: Option<String>,
    pub path_style_endpoint: Option<bool>,
    pub local_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonBackupTask {
    pub id: u64,
    pub user_id: u64,
    pub remote_server_id: u64,
    pub backup_destination_id: u64,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub source_path: Option<String>,
    pub database_name: Option<String>,
    pub excluded_database_tables: Option<serde_json::Value>,
    pub store_path: Option<String>,
    pub maximum_backups_to_keep: Option<u32>,
    pub status: Option<String>,
    pub appended_file_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonSshConfig {
    pub private_key_path: Option<PathBuf>,
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    #[serde(default)]
    pub users: Vec<JsonUser>,
    #[serde(default)]
    pub remote_servers: Vec<JsonRemoteServer>,
    #[serde(default)]
    pub backup_destinations: Vec<JsonBackupDestination>,
    #[serde(default)]
    pub backup_tasks: Vec<JsonBackupTask>,
    pub ssh: Option<JsonSshConfig>,
    pub environment: Option<String>,
    pub remote_work_dir: Option<String>,
}

/// Key material shared by every SSH session of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSettings {
    pub private_key_path: PathBuf,
    pub passphrase: Option<String>,
    pub environment: String,
}

impl SshSettings {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case(DEFAULT_ENVIRONMENT)
    }

    /// A passphrase is always required; the key file only has to exist in production.
    pub fn validate(&self) -> std::result::Result<(), BackupError> {
        if self.passphrase.as_deref().is_none_or(|p| p.is_empty()) {
            return Err(BackupError::Configuration(
                "The SSH passphrase is not set in the configuration.".to_string(),
            ));
        }
        if self.is_production() && !self.private_key_path.is_file() {
            return Err(BackupError::Configuration(format!(
                "Unable to locate SSH keys required for the backup process at {}.",
                self.private_key_path.display()
            )));
        }
        Ok(())
    }
}

// Application's internal configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ssh: SshSettings,
    pub remote_work_dir: String,
    pub inventory: Inventory,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;
        Self::from_raw(raw_json_config, |key| std::env::var(key).ok())
    }

    /// Builds the validated configuration; `env` supplies `SSH_PASSPHRASE`,
    /// `SSH_PRIVATE_KEY_PATH` and `APP_ENV`, which win over the JSON values.
    pub fn from_raw<F>(raw: RawJsonConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_value = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let json_ssh = raw.ssh.clone().unwrap_or_default();

        let ssh = SshSettings {
            private_key_path: env_value("SSH_PRIVATE_KEY_PATH")
                .map(PathBuf::from)
                .or(json_ssh.private_key_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PRIVATE_KEY_PATH)),
            passphrase: env_value("SSH_PASSPHRASE").or(json_ssh.passphrase),
            environment: env_value("APP_ENV")
                .or(raw.environment.clone())
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
        };

        let remote_work_dir = raw
            .remote_work_dir
            .clone()
            .filter(|d| d.starts_with('/'))
            .unwrap_or_else(|| DEFAULT_REMOTE_WORK_DIR.to_string());

        Ok(AppConfig {
            ssh,
            remote_work_dir,
            inventory: build_inventory(raw)?,
        })
    }
}

/// Writes a task's status back into the configuration file, keeping everything else as is.
pub fn save_task_status(config_path: &Path, task_id: u64, status: TaskStatus) -> Result<()> {
    let config_content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
    let mut document: serde_json::Value = serde_json::from_str(&config_content).with_context(|| {
        format!(
            "Failed to parse JSON from config file at {}",
            config_path.display()
        )
    })?;

    let task = document
        .get_mut("backup_tasks")
        .and_then(serde_json::Value::as_array_mut)
        .and_then(|tasks| {
            tasks
                .iter_mut()
                .find(|task| task.get("id").and_then(serde_json::Value::as_u64) == Some(task_id))
        })
        .and_then(serde_json::Value::as_object_mut)
        .ok_or_else(|| anyhow!("Backup task {} is not defined in {}", task_id, config_path.display()))?;
    task.insert("status".to_string(), serde_json::Value::from(status.as_str()));

    let mut updated = serde_json::to_string_pretty(&document)?;
    updated.push('\n');
    fs::write(config_path, updated)
        .with_context(|| format!("Failed to write config file at {}", config_path.display()))?;
    Ok(())
}

fn build_inventory(raw: RawJsonConfig) -> Result<Inventory> {
    let users: Vec<User> = raw
        .users
        .into_iter()
        .map(|u| User {
            id: u.id,
            name: u.name.unwrap_or_default(),
            email: u.email,
            timezone: u.timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
        })
        .collect();

    let remote_servers: Vec<RemoteServer> = raw
        .remote_servers
        .into_iter()
        .map(|s| RemoteServer {
            id: s.id,
            label: s.label.unwrap_or_else(|| s.address.clone()),
            address: s.address,
            port: s.port.unwrap_or(DEFAULT_SSH_PORT),
            username: s.username,
            database_username: s.database_username.filter(|v| !v.is_empty()),
            database_password: s.database_password.filter(|v| !v.is_empty()),
            online: false,
        })
        .collect();

    let backup_destinations = raw
        .backup_destinations
        .into_iter()
        .map(load_destination)
        .collect::<Result<Vec<_>>>()?;

    let user_ids: HashSet<u64> = users.iter().map(|u| u.id).collect();
    let server_ids: HashSet<u64> = remote_servers.iter().map(|s| s.id).collect();
    let destination_ids: HashSet<u64> = backup_destinations.iter().map(|d| d.id).collect();

    let backup_tasks = raw
        .backup_tasks
        .into_iter()
        .map(|t| {
            let task = load_task(t)?;
            if !user_ids.contains(&task.user_id) {
                bail!("Backup task {} references unknown user {}", task.id, task.user_id);
            }
            if !server_ids.contains(&task.remote_server_id) {
                bail!(
                    "Backup task {} references unknown remote server {}",
                    task.id,
                    task.remote_server_id
                );
            }
            if !destination_ids.contains(&task.backup_destination_id) {
                bail!(
                    "Backup task {} references unknown backup destination {}",
                    task.id,
                    task.backup_destination_id
                );
            }
            Ok(task)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Inventory {
        users,
        remote_servers,
        backup_destinations,
        backup_tasks,
    })
}

fn load_destination(raw: JsonBackupDestination) -> Result<BackupDestination> {
    let kind = DestinationKind::parse(&raw.kind)
        .ok_or_else(|| anyhow!("Backup destination {} has unsupported type '{}'", raw.id, raw.kind))?;

    if kind == DestinationKind::CustomS3 {
        let endpoint = raw
            .custom_s3_endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .with_context(|| {
                format!(
                    "custom_s3_endpoint must be set for {} destination {}",
                    DRIVER_CUSTOM_S3, raw.id
                )
            })?;
        url::Url::parse(endpoint)
            .with_context(|| format!("Invalid custom_s3_endpoint for destination {}: {}", raw.id, endpoint))?;
    }
    if matches!(kind, DestinationKind::S3 | DestinationKind::CustomS3)
        && raw.s3_bucket_name.as_deref().is_none_or(str::is_empty)
    {
        bail!("s3_bucket_name must be set for backup destination {}", raw.id);
    }
    if kind == DestinationKind::Local && raw.local_path.is_none() {
        bail!("local_path must be set for backup destination {}", raw.id);
    }

    Ok(BackupDestination {
        id: raw.id,
        label: raw.label.unwrap_or_else(|| format!("destination {}", raw.id)),
        kind,
        s3_bucket_name: raw.s3_bucket_name,
        s3_region: raw.s3_region.filter(|r| !r.is_empty()),
        s3_access_key: raw.s3_access_key.filter(|k| !k.is_empty()),
        s3_secret_key: raw.s3_secret_key.filter(|k| !k.is_empty()),
        custom_s3_endpoint: raw.custom_s3_endpoint,
        use_path_style_endpoint: raw.path_style_endpoint.unwrap_or(false),
        local_path: raw.local_path,
    })
}

fn load_task(raw: JsonBackupTask) -> Result<BackupTask> {
    let database_name = raw.database_name.filter(|d| !d.trim().is_empty());
    let source_path = raw.source_path.filter(|p| !p.trim().is_empty());
    if database_name.is_some() && source_path.is_some() {
        bail!(
            "Backup task {} must set exactly one of database_name or source_path",
            raw.id
        );
    }

    let kind = match raw.kind.as_deref().map(str::to_ascii_lowercase) {
        Some(kind) => kind,
        None => match (&database_name, &source_path) {
            (Some(_), None) => "database".to_string(),
            (None, Some(_)) => "files".to_string(),
            _ => bail!(
                "Backup task {} must set exactly one of database_name or source_path",
                raw.id
            ),
        },
    };

    let mode = match kind.as_str() {
        "database" => BackupMode::Database {
            database_name: database_name
                .with_context(|| format!("Backup task {} is a database task without database_name", raw.id))?,
            excluded_tables: parse_excluded_tables(&raw.excluded_database_tables)
                .with_context(|| format!("Invalid excluded_database_tables for backup task {}", raw.id))?,
        },
        "files" => BackupMode::Files {
            source_path: source_path
                .with_context(|| format!("Backup task {} is a files task without source_path", raw.id))?,
        },
        other => bail!("Backup task {} has unsupported type '{}'", raw.id, other),
    };

    let status = match raw.status.as_deref() {
        None => TaskStatus::Ready,
        Some(value) => match TaskStatus::parse(value) {
            Some(TaskStatus::Running) => {
                warn!(backup_task_id = raw.id, "Task was left running; resetting it to ready.");
                TaskStatus::Ready
            }
            Some(status) => status,
            None => bail!("Backup task {} has unknown status '{}'", raw.id, value),
        },
    };

    Ok(BackupTask {
        id: raw.id,
        user_id: raw.user_id,
        remote_server_id: raw.remote_server_id,
        backup_destination_id: raw.backup_destination_id,
        label: raw.label,
        mode,
        store_path: raw.store_path.filter(|p| !p.trim().is_empty()),
        maximum_backups_to_keep: raw.maximum_backups_to_keep.unwrap_or(0),
        status,
        appended_file_name: raw.appended_file_name,
    })
}

/// Accepts `["t1", "t2"]` or the comma separated form `"t1,t2"`.
fn parse_excluded_tables(value: &Option<serde_json::Value>) -> Result<Vec<String>> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::String(raw)) => Ok(crate::backup::db_dump::parse_excluded_tables(raw)),
        Some(value) if value.is_array() => {
            let tables: Vec<String> = serde_json::from_value(value.clone())
                .context("Failed to parse excluded_database_tables as array")?;
            Ok(tables
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect())
        }
        Some(_) => Err(anyhow!(
            "excluded_database_tables must be either an array of table names or a comma separated string"
        )),
    }
}
