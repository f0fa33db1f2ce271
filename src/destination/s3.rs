// serverbackup/src/destination/s3.rs
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::{BehaviorVersion, Credentials, Region};
use s3::primitives::ByteStream;
use s3::types::{CompletedMultipartUpload, CompletedPart};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::{DestinationStore, StoredFile, sort_newest_first};
use crate::errors::{BackupError, Result};
use crate::records::{BackupDestination, DestinationKind};

/// Files above this size go through a multipart upload.
const MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024;
const MULTIPART_PART_SIZE: usize = 16 * 1024 * 1024;
const DEFAULT_REGION: &str = "us-east-1";

/// S3 or any S3-compatible endpoint (DigitalOcean Spaces, MinIO, ...).
pub struct S3Store {
    client: s3::Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub async fn from_destination(destination: &BackupDestination) -> Result<Self> {
        let bucket = destination
            .s3_bucket_name
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| {
                BackupError::Configuration(format!(
                    "Backup destination {} has no s3_bucket_name",
                    destination.id
                ))
            })?;
        let region = destination
            .s3_region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));
        if let (Some(access_key), Some(secret_key)) =
            (&destination.s3_access_key, &destination.s3_secret_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "Static",
            ));
        }
        let sdk_config = loader.load().await;

        let mut builder = s3::config::Builder::from(&sdk_config);
        if destination.kind == DestinationKind::CustomS3 {
            let endpoint = destination.custom_s3_endpoint.as_deref().ok_or_else(|| {
                BackupError::Configuration(format!(
                    "Backup destination {} has no custom_s3_endpoint",
                    destination.id
                ))
            })?;
            builder = builder.endpoint_url(endpoint);
        }
        builder = builder.force_path_style(destination.use_path_style_endpoint);

        debug!(bucket = %bucket, kind = ?destination.kind, "S3 client configured.");
        Ok(Self::new(s3::Client::from_conf(builder.build()), bucket))
    }

    async fn put_single(&self, local_path: &Path, key: &str) -> Result<()> {
        let body = ByteStream::from_path(local_path).await.map_err(|e| {
            BackupError::Transfer(format!(
                "Failed to create ByteStream from file {}: {}",
                local_path.display(),
                e
            ))
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                BackupError::Transfer(format!(
                    "Failed to upload {} to bucket {} with key {}: {}",
                    local_path.display(),
                    self.bucket,
                    key,
                    e
                ))
            })?;
        Ok(())
    }

    async fn put_multipart(&self, local_path: &Path, key: &str, size: u64) -> Result<()> {
        info!(key, size, "Starting multipart upload.");
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BackupError::Transfer(format!("Failed to initiate multipart upload: {}", e)))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| BackupError::Transfer("No upload ID returned".to_string()))?
            .to_string();

        match self.upload_parts(local_path, key, &upload_id).await {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
                    .send()
                    .await
                    .map_err(|e| {
                        BackupError::Transfer(format!("Failed to complete multipart upload: {}", e))
                    })?;
                info!(key, "Multipart upload completed.");
                Ok(())
            }
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, error = %abort_err, "Failed to abort multipart upload.");
                }
                Err(err)
            }
        }
    }

    async fn upload_parts(&self, local_path: &Path, key: &str, upload_id: &str) -> Result<Vec<CompletedPart>> {
        let mut file = tokio::fs::File::open(local_path).await.map_err(|e| {
            BackupError::Transfer(format!("Failed to open {}: {}", local_path.display(), e))
        })?;
        let mut parts = Vec::new();
        let mut part_number = 1;

        loop {
            let buffer = read_part(&mut file, MULTIPART_PART_SIZE).await.map_err(|e| {
                BackupError::Transfer(format!("Failed to read {}: {}", local_path.display(), e))
            })?;
            if buffer.is_empty() {
                break;
            }
            debug!(key, part_number, bytes = buffer.len(), "Uploading part.");

            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buffer))
                .send()
                .await
                .map_err(|e| BackupError::Transfer(format!("Part {} upload failed: {}", part_number, e)))?;

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(uploaded.e_tag().unwrap_or_default())
                    .build(),
            );
            part_number += 1;
        }
        Ok(parts)
    }
}

/// Fills up to `size` bytes; a short buffer means end of file.
async fn read_part(file: &mut tokio::fs::File, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let read = file.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

fn to_chrono(value: Option<&s3::primitives::DateTime>) -> DateTime<Utc> {
    value
        .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[async_trait]
impl DestinationStore for S3Store {
    fn name(&self) -> &str {
        "s3"
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| BackupError::Transfer(format!("Failed to stat {}: {}", local_path.display(), e)))?
            .len();
        info!(bucket = %self.bucket, key, size, "Uploading artifact.");

        if size > MULTIPART_THRESHOLD {
            self.put_multipart(local_path, key, size).await
        } else {
            self.put_single(local_path, key).await
        }
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<StoredFile>> {
        let mut files = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| BackupError::Transfer(format!("Failed to list objects under {}: {}", prefix, e)))?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    files.push(StoredFile {
                        key: key.to_string(),
                        last_modified: to_chrono(object.last_modified()),
                    });
                }
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        sort_newest_first(&mut files);
        Ok(files)
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BackupError::Transfer(format!("Failed to delete {}: {}", key, e)))?;
        info!(bucket = %self.bucket, key, "Deleted object.");
        Ok(())
    }
}
