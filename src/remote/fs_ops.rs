// serverbackup/src/remote/fs_ops.rs
//! Filesystem probes and cleanup run over a remote session.

use tracing::{debug, error, info};

use super::shell::quote;
use super::{RemoteSession, ensure_connected};
use crate::errors::{BackupError, Result};

/// Marker files of an application checkout.
const PROJECT_MARKERS: [&str; 3] = ["artisan", "composer.json", "package.json"];

/// Missing or unreadable paths are reported as absent, not as errors.
pub async fn path_exists(session: &dyn RemoteSession, path: &str) -> Result<bool> {
    ensure_connected(session)?;
    let exists = session.stat(path).await?.is_some();
    debug!(path, exists, "Path existence check result.");
    Ok(exists)
}

/// Recursive size of a remote directory in bytes.
pub async fn directory_size(session: &dyn RemoteSession, path: &str) -> Result<u64> {
    ensure_connected(session)?;
    info!(path, "Getting remote directory size.");

    let probe = session.exec("du --version").await?;
    if probe.trimmed().is_empty() || !probe.exited_cleanly() {
        error!("The du command is not available on the remote server.");
        return Err(BackupError::Disk(
            "The du command is not available on the remote server.".to_string(),
        ));
    }

    let output = session
        .exec(&format!("du -sb {} | cut -f1", quote(path)))
        .await?;
    debug!(output = %output.text, "Directory size command output.");
    output.trimmed().parse::<u64>().map_err(|_| {
        error!(path, output = %output.text, "Failed to get directory size.");
        BackupError::Disk(format!("Failed to get directory size for {}.", path))
    })
}

/// Free space, in bytes, on the filesystem holding `directory`.
pub async fn available_space(session: &dyn RemoteSession, directory: &str) -> Result<u64> {
    ensure_connected(session)?;
    let output = session
        .exec(&format!("df -P {} | tail -1 | awk '{{print $4}}'", quote(directory)))
        .await?;
    let kilobytes = output.trimmed().parse::<u64>().map_err(|_| {
        error!(directory, output = %output.text, "Failed to get available disk space.");
        BackupError::Disk(format!("Failed to get available disk space for {}.", directory))
    })?;
    Ok(kilobytes.saturating_mul(1024))
}

/// Size of a regular file, or `None` when it is missing.
pub async fn file_size(session: &dyn RemoteSession, path: &str) -> Result<Option<u64>> {
    ensure_connected(session)?;
    let quoted = quote(path);
    let output = session
        .exec(&format!("test -f {} && stat -c%s {}", quoted, quoted))
        .await?;
    Ok(output.trimmed().parse::<u64>().ok())
}

/// True when the file exists and is not empty.
pub async fn is_non_empty_file(session: &dyn RemoteSession, path: &str) -> Result<bool> {
    ensure_connected(session)?;
    let output = session
        .exec(&format!(
            "test -s {} && echo \"exists\" || echo \"not exists\"",
            quote(path)
        ))
        .await?;
    Ok(output.trimmed() == "exists")
}

pub async fn create_directory(session: &dyn RemoteSession, path: &str) -> Result<()> {
    ensure_connected(session)?;
    let output = session.exec(&format!("mkdir -p {}", quote(path))).await?;
    if !output.exited_cleanly() {
        return Err(BackupError::Disk(format!(
            "Failed to create remote directory {}: {}",
            path,
            output.trimmed()
        )));
    }
    Ok(())
}

/// Recursive delete. Callers treat a failure as non-fatal.
pub async fn delete_remote_directory(session: &dyn RemoteSession, path: &str) -> Result<()> {
    ensure_connected(session)?;
    info!(folder_path = path, "Deleting folder.");
    let output = session.exec(&format!("rm -rf {}", quote(path))).await?;
    if !output.exited_cleanly() {
        return Err(BackupError::Disk(format!(
            "Failed to delete folder {}: {}",
            path,
            output.trimmed()
        )));
    }
    info!(folder_path = path, "Folder deleted.");
    Ok(())
}

/// Informational only: whether `path` looks like an application checkout.
pub async fn is_project_directory(session: &dyn RemoteSession, path: &str) -> Result<bool> {
    let base = path.trim_end_matches('/');
    for marker in PROJECT_MARKERS {
        if !path_exists(session, &format!("{}/{}", base, marker)).await? {
            return Ok(false);
        }
    }
    Ok(true)
}
