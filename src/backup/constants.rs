// serverbackup/src/backup/constants.rs
pub const ZIP_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const ZIP_RETRY_DELAY_SECONDS: u64 = 5;
pub const SSH_CONNECT_TIMEOUT_SECS: u64 = 120;

/// Artifacts above this size are refused before upload.
pub const FILE_SIZE_LIMIT: u64 = 50 * 1024 * 1024 * 1024;

pub const DATABASE_TYPE_MYSQL: &str = "mysql";
pub const DATABASE_TYPE_POSTGRESQL: &str = "postgresql";

pub const DRIVER_S3: &str = "s3";
pub const DRIVER_CUSTOM_S3: &str = "custom_s3";
pub const DRIVER_LOCAL: &str = "local";

pub const DEFAULT_REMOTE_WORK_DIR: &str = "/tmp";
