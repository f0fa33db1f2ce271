// serverbackup/src/destination/local.rs
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use super::{DestinationStore, StoredFile, sort_newest_first};
use crate::errors::{BackupError, Result};

/// Keeps artifacts under a directory on this machine, keys mapped to relative paths.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(BackupError::Transfer(format!("Refusing object key {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

/// Walks `dir` recursively, keeping files whose key relative to `root` starts with `prefix`.
fn collect(root: &Path, dir: &Path, prefix: &str, files: &mut Vec<StoredFile>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            collect(root, &path, prefix, files)?;
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let key = relative.to_string_lossy().replace('\\', "/");
        if key.starts_with(prefix) {
            files.push(StoredFile {
                key,
                last_modified: DateTime::<Utc>::from(metadata.modified()?),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl DestinationStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        let target = self.resolve(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                BackupError::Transfer(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let bytes = tokio::fs::copy(local_path, &target).await.map_err(|e| {
            BackupError::Transfer(format!(
                "Failed to copy {} to {}: {}",
                local_path.display(),
                target.display(),
                e
            ))
        })?;
        info!(path = %target.display(), bytes, "Stored artifact.");
        Ok(())
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<StoredFile>> {
        let root = self.root.clone();
        let prefix = prefix.trim_start_matches('/').to_string();
        let listed = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            if root.exists() {
                collect(&root, &root, &prefix, &mut files)?;
            }
            Ok::<_, std::io::Error>(files)
        })
        .await?;
        let mut files =
            listed.map_err(|e| BackupError::Transfer(format!("Failed to list {}: {}", self.root.display(), e)))?;
        sort_newest_first(&mut files);
        Ok(files)
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        let target = self.resolve(key)?;
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| BackupError::Transfer(format!("Failed to delete {}: {}", target.display(), e)))?;
        Ok(())
    }
}
