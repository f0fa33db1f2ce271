//! Where finished artifacts end up.
//!
//! Every backend implements [`DestinationStore`]; the orchestrator only ever
//! talks to the trait and picks a backend through a [`StoreProvider`].

pub mod local;
pub mod s3;
#[cfg(test)]
pub mod testing;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::{BackupError, Result};
use crate::records::{BackupDestination, DestinationKind};

pub use local::LocalStore;
pub use s3::S3Store;

/// One object in a destination listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Streams the file at `local_path` to `key`.
    async fn upload(&self, local_path: &Path, key: &str) -> Result<()>;

    /// Objects whose key starts with `prefix`, newest first.
    async fn list_files(&self, prefix: &str) -> Result<Vec<StoredFile>>;

    async fn delete_file(&self, key: &str) -> Result<()>;
}

/// Newest first; ties broken by key, descending, so the order is total.
pub fn sort_newest_first(files: &mut [StoredFile]) {
    files.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| b.key.cmp(&a.key))
    });
}

/// Builds a store for a destination record.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    async fn store_for(&self, destination: &BackupDestination) -> Result<Box<dyn DestinationStore>>;
}

/// Selects the backend by the destination's kind tag.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackendStoreProvider;

#[async_trait]
impl StoreProvider for BackendStoreProvider {
    async fn store_for(&self, destination: &BackupDestination) -> Result<Box<dyn DestinationStore>> {
        match destination.kind {
            DestinationKind::S3 | DestinationKind::CustomS3 => {
                Ok(Box::new(S3Store::from_destination(destination).await?))
            }
            DestinationKind::Local => {
                let root = destination.local_path.as_ref().ok_or_else(|| {
                    BackupError::Configuration(format!(
                        "Backup destination {} has no local_path",
                        destination.id
                    ))
                })?;
                Ok(Box::new(LocalStore::new(root)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn file(key: &str, secs: i64) -> StoredFile {
        StoredFile {
            key: key.to_string(),
            last_modified: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn sorts_newest_first_with_key_tiebreak() {
        let mut files = vec![file("a", 10), file("c", 30), file("b", 30), file("d", 20)];
        sort_newest_first(&mut files);
        let keys: Vec<_> = files.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["c", "b", "d", "a"]);
    }

    #[tokio::test]
    async fn local_destination_requires_a_path() {
        let mut destination = crate::records::fixtures::destination();
        destination.kind = DestinationKind::Local;
        let result = BackendStoreProvider.store_for(&destination).await;
        assert!(matches!(result, Err(BackupError::Configuration(_))));
    }

    #[tokio::test]
    async fn local_destination_builds_local_store() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut destination = crate::records::fixtures::destination();
        destination.kind = DestinationKind::Local;
        destination.local_path = Some(dir.path().to_path_buf());
        let store = BackendStoreProvider.store_for(&destination).await?;
        assert_eq!(store.name(), "local");
        Ok(())
    }
}
