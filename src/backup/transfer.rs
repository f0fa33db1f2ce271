// serverbackup/src/backup/transfer.rs
use tempfile::NamedTempFile;
use tracing::{debug, error, info};

use super::constants::FILE_SIZE_LIMIT;
use crate::destination::DestinationStore;
use crate::errors::{BackupError, Result};
use crate::remote::{RemoteSession, ensure_connected};

/// Fetches a remote artifact into a uniquely named local temporary file.
///
/// The file is removed when the returned handle drops, whichever way the caller exits.
pub async fn download(session: &dyn RemoteSession, remote_path: &str) -> Result<NamedTempFile> {
    ensure_connected(session)?;
    download_with_limit(session, remote_path, FILE_SIZE_LIMIT).await
}

fn oversized(remote_path: &str, bytes: u64, limit: u64) -> BackupError {
    error!(remote_path, bytes, limit, "Artifact exceeds the size limit.");
    BackupError::Transfer(format!(
        "Artifact {} is {} bytes, above the {} byte limit",
        remote_path, bytes, limit
    ))
}

async fn download_with_limit(session: &dyn RemoteSession, remote_path: &str, limit: u64) -> Result<NamedTempFile> {
    if let Some(size) = session.stat(remote_path).await? {
        if size > limit {
            return Err(oversized(remote_path, size, limit));
        }
    }

    let temp = tempfile::Builder::new()
        .prefix("serverbackup-")
        .tempfile()
        .map_err(|e| BackupError::Transfer(format!("Failed to create temporary file: {}", e)))?;

    let bytes = session.download(remote_path, temp.path()).await.map_err(|e| {
        error!(remote_path, error = %e, "Failed to download the remote file.");
        e
    })?;
    debug!(temp_file = %temp.path().display(), bytes, "Remote file downloaded.");

    if bytes > limit {
        return Err(oversized(remote_path, bytes, limit));
    }
    Ok(temp)
}

pub async fn upload(temp: &NamedTempFile, store: &dyn DestinationStore, key: &str) -> Result<()> {
    info!(backend = store.name(), key, "Uploading artifact to destination.");
    store.upload(temp.path(), key).await
}

/// Download then upload. The temporary file is gone when this returns.
pub async fn transfer_artifact(
    session: &dyn RemoteSession,
    remote_path: &str,
    store: &dyn DestinationStore,
    key: &str,
) -> Result<()> {
    let temp = download(session, remote_path).await?;
    let result = upload(&temp, store, key).await;
    if let Err(e) = temp.close() {
        debug!(error = %e, "Temporary file already removed.");
    }
    result?;
    info!(key, "Artifact transferred.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::testing::MemoryStore;
    use crate::remote::testing::ScriptedSession;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn download_writes_prefixed_temp_file() -> anyhow::Result<()> {
        let session = ScriptedSession::new().with_download(Some(b"payload".to_vec()));
        let temp = download(&session, "/tmp/run/dump.sql").await?;
        let name = temp.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("serverbackup-"));
        assert_eq!(std::fs::read(temp.path())?, b"payload");
        Ok(())
    }

    #[tokio::test]
    async fn oversized_artifact_is_rejected() {
        let session = ScriptedSession::new().with_download(Some(vec![0u8; 16]));
        let result = download_with_limit(&session, "/tmp/big.zip", 8).await;
        assert!(matches!(result, Err(BackupError::Transfer(_))));
    }

    #[tokio::test]
    async fn oversized_artifact_is_rejected_before_download() {
        let session = ScriptedSession::new()
            .with_file("/tmp/big.zip", 16)
            .with_download(None);
        let err = download_with_limit(&session, "/tmp/big.zip", 8).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Transfer failed: Artifact /tmp/big.zip is 16 bytes, above the 8 byte limit"
        );
    }

    #[tokio::test]
    async fn transfer_uploads_body() -> anyhow::Result<()> {
        let session = ScriptedSession::new().with_download(Some(b"zipdata".to_vec()));
        let store = MemoryStore::new();
        transfer_artifact(&session, "/tmp/site.zip", &store, "backups/site.zip").await?;
        assert_eq!(store.body("backups/site.zip"), Some(b"zipdata".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn temp_file_removed_when_upload_fails() -> anyhow::Result<()> {
        let session = ScriptedSession::new();
        let store = MemoryStore::new();
        store.fail_uploads.store(true, Ordering::SeqCst);

        let temp = download(&session, "/tmp/site.zip").await?;
        let path = temp.path().to_path_buf();
        assert!(upload(&temp, &store, "k").await.is_err());
        drop(temp);
        assert!(!path.exists());

        let result = transfer_artifact(&session, "/tmp/site.zip", &store, "k").await;
        assert!(matches!(result, Err(BackupError::Transfer(_))));
        Ok(())
    }

    #[tokio::test]
    async fn failed_download_is_a_transfer_error() {
        let session = ScriptedSession::new().with_download(None);
        let store = MemoryStore::new();
        let result = transfer_artifact(&session, "/tmp/site.zip", &store, "k").await;
        assert!(matches!(result, Err(BackupError::Transfer(_))));
        assert!(store.keys().is_empty());
    }
}
