//! Remote shell access to the host being backed up.

pub mod fs_ops;
pub mod shell;
pub mod ssh;
#[cfg(test)]
pub mod testing;

use std::path::Path;

use async_trait::async_trait;
use tracing::error;

use crate::errors::{BackupError, Result};
use crate::records::RemoteServer;

/// Combined stdout/stderr of a remote command plus its exit status, when the
/// transport reports one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub text: String,
    pub exit_status: Option<i32>,
}

impl CommandOutput {
    #[cfg(test)]
    pub fn new(text: impl Into<String>, exit_status: Option<i32>) -> Self {
        Self {
            text: text.into(),
            exit_status,
        }
    }

    pub fn trimmed(&self) -> &str {
        self.text.trim()
    }

    /// True unless the remote side reported a non-zero status.
    pub fn exited_cleanly(&self) -> bool {
        self.exit_status.is_none_or(|code| code == 0)
    }
}

/// An authenticated session on a remote host.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn exec(&self, command: &str) -> Result<CommandOutput>;

    /// Size of the remote file, or `None` when it cannot be stat'ed.
    async fn stat(&self, path: &str) -> Result<Option<u64>>;

    /// Copies a remote file into `local_path`, returning the number of bytes written.
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64>;

    async fn disconnect(&self);
}

/// Opens sessions for the orchestrator.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, server: &RemoteServer) -> Result<Box<dyn RemoteSession>>;
}

/// Fails fast when the session dropped instead of letting commands return empty output.
pub fn ensure_connected(session: &dyn RemoteSession) -> Result<()> {
    if session.is_connected() {
        Ok(())
    } else {
        error!("SFTP connection lost.");
        Err(BackupError::Connection("SFTP connection lost.".to_string()))
    }
}
