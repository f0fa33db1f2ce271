use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Disk error: {0}")]
    Disk(String),

    #[error("Database dump failed: {0}")]
    Dump(String),

    #[error("Archive operation failed: {0}")]
    Archive(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backup task {0} not found")]
    TaskNotFound(u64),

    #[error("{kind} {id} not found")]
    RecordNotFound { kind: &'static str, id: u64 },

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Unexpected error during backup: {0}")]
    Unexpected(String),
}

impl BackupError {
    /// Expected operational failures: recorded, notified, and not re-raised.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            BackupError::Connection(_)
                | BackupError::Disk(_)
                | BackupError::Dump(_)
                | BackupError::Archive(_)
                | BackupError::Transfer(_)
        )
    }
}

impl From<tokio::task::JoinError> for BackupError {
    fn from(err: tokio::task::JoinError) -> Self {
        BackupError::Unexpected(format!("blocking remote operation aborted: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
