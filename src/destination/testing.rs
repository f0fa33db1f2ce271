// serverbackup/src/destination/testing.rs
//! In-memory destination for orchestrator and rotation tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use super::{DestinationStore, StoreProvider, StoredFile, sort_newest_first};
use crate::errors::{BackupError, Result};
use crate::records::BackupDestination;

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<Vec<(StoredFile, Vec<u8>)>>,
    pub fail_uploads: AtomicBool,
    pub fail_listing: AtomicBool,
    pub fail_deletes: AtomicBool,
    deleted: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object with an explicit modification time in seconds.
    pub fn seed(&self, key: &str, modified_secs: i64) {
        let last_modified = Utc.timestamp_opt(modified_secs, 0).unwrap();
        self.objects.lock().unwrap().push((
            StoredFile {
                key: key.to_string(),
                last_modified,
            },
            Vec::new(),
        ));
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|(f, _)| f.key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .find(|(f, _)| f.key == key)
            .map(|(_, body)| body.clone())
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn newest(&self) -> DateTime<Utc> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .map(|(f, _)| f.last_modified)
            .max()
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

#[async_trait]
impl DestinationStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(BackupError::Transfer(format!("upload of {} rejected", key)));
        }
        let body = std::fs::read(local_path).map_err(|e| BackupError::Transfer(e.to_string()))?;
        let last_modified = self.newest() + chrono::Duration::seconds(1);
        self.objects.lock().unwrap().push((
            StoredFile {
                key: key.to_string(),
                last_modified,
            },
            body,
        ));
        Ok(())
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<StoredFile>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(BackupError::Transfer("listing rejected".to_string()));
        }
        let mut files: Vec<_> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(f, _)| f.key.starts_with(prefix))
            .map(|(f, _)| f.clone())
            .collect();
        sort_newest_first(&mut files);
        Ok(files)
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BackupError::Transfer(format!("delete of {} rejected", key)));
        }
        self.objects.lock().unwrap().retain(|(f, _)| f.key != key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

#[async_trait]
impl<T: DestinationStore + ?Sized> DestinationStore for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        (**self).upload(local_path, key).await
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<StoredFile>> {
        (**self).list_files(prefix).await
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        (**self).delete_file(key).await
    }
}

/// Hands every destination the same shared store.
pub struct SharedStoreProvider(pub Arc<MemoryStore>);

#[async_trait]
impl StoreProvider for SharedStoreProvider {
    async fn store_for(&self, _destination: &BackupDestination) -> Result<Box<dyn DestinationStore>> {
        Ok(Box::new(Arc::clone(&self.0)))
    }
}
