// serverbackup/src/backup/archive.rs
use std::time::Duration;

use tracing::{debug, error, info};

use super::constants::{ZIP_RETRY_DELAY_SECONDS, ZIP_RETRY_MAX_ATTEMPTS};
use crate::errors::{BackupError, Result};
use crate::remote::fs_ops::{available_space, directory_size, file_size};
use crate::remote::shell::{parent_dir, quote};
use crate::remote::{RemoteSession, ensure_connected};
use crate::utils::retry::{RetryPolicy, with_retry};

/// zip reports "nothing to do" with 12 and "some files could not be read" with 18.
/// Only 18 still leaves a usable archive.
const ZIP_WARNING_STATUS: i32 = 18;

/// Zips a remote directory in place on the remote host.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveBuilder {
    retry: RetryPolicy,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new(RetryPolicy::new(
            ZIP_RETRY_MAX_ATTEMPTS,
            Duration::from_secs(ZIP_RETRY_DELAY_SECONDS),
        ))
    }
}

impl ArchiveBuilder {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Fails before zipping when the target filesystem cannot hold the source.
    async fn preflight(&self, session: &dyn RemoteSession, source_path: &str, target_zip_path: &str) -> Result<()> {
        let required = directory_size(session, source_path).await?;
        info!(source_path, dir_size = required, "Directory size calculated.");

        let target_dir = parent_dir(target_zip_path);
        let available = available_space(session, target_dir).await?;
        info!(remote_zip_path = target_zip_path, available_space = available, "Available disk space calculated.");

        if available < required {
            error!(
                source_path,
                remote_zip_path = target_zip_path,
                required_space = required,
                available_space = available,
                "Not enough disk space to create the zip file."
            );
            return Err(BackupError::Disk(
                "Not enough disk space to create the zip file.".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn archive(&self, session: &dyn RemoteSession, source_path: &str, target_zip_path: &str) -> Result<()> {
        info!(source_path, remote_zip_path = target_zip_path, "Zipping remote directory.");
        ensure_connected(session)?;

        self.preflight(session, source_path, target_zip_path).await?;

        let command = format!("cd {} && zip -rq {} .", quote(source_path), quote(target_zip_path));
        debug!(zip_command = %command, "Executing zip command.");

        let output = with_retry(&self.retry, "zip", |_attempt| {
            let command = command.as_str();
            async move {
                let output = session.exec(command).await?;
                match output.exit_status {
                    Some(code) if code != 0 && code != ZIP_WARNING_STATUS => Err(BackupError::Archive(format!(
                        "zip exited with status {}: {}",
                        code,
                        output.trimmed()
                    ))),
                    _ => Ok(output),
                }
            }
        })
        .await
        .map_err(|e| {
            error!(source_path, remote_zip_path = target_zip_path, error = %e, "Failed to execute zip command after retries.");
            BackupError::Archive(format!("Failed to zip the directory after multiple attempts: {}", e))
        })?;
        debug!(output = %output.text, "Zip command output.");

        match file_size(session, target_zip_path).await? {
            Some(size) if size > 0 => {
                info!(source_path, remote_zip_path = target_zip_path, file_size = size, "Remote directory successfully zipped.");
                Ok(())
            }
            _ => {
                error!(remote_zip_path = target_zip_path, "Zip file does not exist or is empty after zipping.");
                Err(BackupError::Archive(
                    "Zip file does not exist or is empty after zipping.".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::CommandOutput;
    use crate::remote::testing::{Reply, ScriptedSession};

    fn quick() -> ArchiveBuilder {
        ArchiveBuilder::new(RetryPolicy::new(3, Duration::from_millis(1)))
    }

    fn healthy() -> ScriptedSession {
        ScriptedSession::new()
            .on("du --version", "du (GNU coreutils) 9.1")
            .on("du -sb", "1000")
            .on("df -P", "10")
            .on("test -f", "4096")
    }

    #[tokio::test]
    async fn archives_when_space_allows() -> anyhow::Result<()> {
        let session = healthy();
        quick().archive(&session, "/var/www/site", "/tmp/run/site.zip").await?;
        assert_eq!(session.count_matching("zip -rq"), 1);
        assert!(session
            .executed()
            .iter()
            .any(|c| c == "cd /var/www/site && zip -rq /tmp/run/site.zip ."));
        assert!(session.executed().iter().any(|c| c.starts_with("df -P /tmp/run ")));
        Ok(())
    }

    #[tokio::test]
    async fn non_numeric_size_fails_without_zipping() {
        let session = ScriptedSession::new()
            .on("du --version", "du (GNU coreutils) 9.1")
            .on("du -sb", "du: cannot access")
            .on("df -P", "10");
        let result = quick().archive(&session, "/var/www/site", "/tmp/site.zip").await;
        assert!(matches!(result, Err(BackupError::Disk(_))));
        assert_eq!(session.count_matching("zip -rq"), 0);
    }

    #[tokio::test]
    async fn non_numeric_space_fails_without_zipping() {
        let session = ScriptedSession::new()
            .on("du --version", "du (GNU coreutils) 9.1")
            .on("du -sb", "1000")
            .on("df -P", "");
        let result = quick().archive(&session, "/var/www/site", "/tmp/site.zip").await;
        assert!(matches!(result, Err(BackupError::Disk(_))));
        assert_eq!(session.count_matching("zip -rq"), 0);
    }

    #[tokio::test]
    async fn insufficient_space_fails_without_retry() {
        let session = ScriptedSession::new()
            .on("du --version", "du (GNU coreutils) 9.1")
            .on("du -sb", "5000")
            .on("df -P", "1");
        let err = quick()
            .archive(&session, "/var/www/site", "/tmp/site.zip")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Disk error: Not enough disk space to create the zip file.");
        assert_eq!(session.count_matching("zip -rq"), 0);
    }

    #[tokio::test]
    async fn success_on_second_attempt_is_success() -> anyhow::Result<()> {
        let session = healthy().on_replies(
            "zip -rq",
            vec![
                Reply::Output(CommandOutput::new("zip I/O error: No space left on device", Some(15))),
                Reply::Output(CommandOutput::new("", Some(0))),
            ],
        );
        quick().archive(&session, "/var/www/site", "/tmp/site.zip").await?;
        assert_eq!(session.count_matching("zip -rq"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn refused_channel_is_retried_on_the_same_session() -> anyhow::Result<()> {
        let session = healthy().on_replies(
            "zip -rq",
            vec![
                Reply::Fail("Remote command failed: [Session(-21)] Unable to complete request for channel-process-startup".into()),
                Reply::Output(CommandOutput::new("", Some(0))),
            ],
        );
        quick().archive(&session, "/var/www/site", "/tmp/site.zip").await?;
        assert_eq!(session.count_matching("zip -rq"), 2);
        assert!(session.is_connected());
        Ok(())
    }

    #[tokio::test]
    async fn lost_transport_stops_further_attempts() {
        let session = healthy().on_replies(
            "zip -rq",
            vec![Reply::Disconnect("Remote command failed: [Session(-43)] Failure while reading".into())],
        );
        let err = quick()
            .archive(&session, "/var/www/site", "/tmp/site.zip")
            .await
            .unwrap_err();
        assert!(matches!(&err, BackupError::Archive(m) if m.contains("SFTP connection lost")));
        assert_eq!(session.count_matching("zip -rq"), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_are_an_archive_error() {
        let session = healthy().on_replies(
            "zip -rq",
            vec![Reply::Output(CommandOutput::new("zip I/O error", Some(15)))],
        );
        let err = quick()
            .archive(&session, "/var/www/site", "/tmp/site.zip")
            .await
            .unwrap_err();
        assert!(matches!(&err, BackupError::Archive(m) if m.starts_with("Failed to zip the directory after multiple attempts")));
        assert_eq!(session.count_matching("zip -rq"), 3);
    }

    #[tokio::test]
    async fn zip_warnings_do_not_trigger_retry() -> anyhow::Result<()> {
        let session = healthy().on_status("zip -rq", "zip warning: could not open for reading", 18);
        quick().archive(&session, "/var/www/site", "/tmp/site.zip").await?;
        assert_eq!(session.count_matching("zip -rq"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_archive_fails() {
        let session = ScriptedSession::new()
            .on("du --version", "du (GNU coreutils) 9.1")
            .on("du -sb", "1000")
            .on("df -P", "10")
            .on("test -f", "0");
        let result = quick().archive(&session, "/var/www/site", "/tmp/site.zip").await;
        assert!(matches!(result, Err(BackupError::Archive(_))));
    }
}
