// serverbackup/src/backup/db_dump.rs
use std::fmt;

use tracing::{debug, error, info};

use super::constants::{DATABASE_TYPE_MYSQL, DATABASE_TYPE_POSTGRESQL};
use crate::errors::{BackupError, Result};
use crate::remote::fs_ops::is_non_empty_file;
use crate::remote::shell::quote;
use crate::remote::{RemoteSession, ensure_connected};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseEngine {
    MySql,
    PostgreSql,
}

impl DatabaseEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseEngine::MySql => DATABASE_TYPE_MYSQL,
            DatabaseEngine::PostgreSql => DATABASE_TYPE_POSTGRESQL,
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the dump command needs to authenticate and what to leave out.
#[derive(Debug, Clone, Copy)]
pub struct DumpRequest<'a> {
    pub database_name: &'a str,
    pub username: Option<&'a str>,
    pub password: &'a str,
    pub excluded_tables: &'a [String],
}

/// Splits a comma separated table list, dropping blanks.
pub fn parse_excluded_tables(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn probe_matches(output: &str, tool: &str) -> bool {
    let lowered = output.to_ascii_lowercase();
    lowered.contains(tool) && !lowered.contains("not found")
}

/// Probes `mysql` first, then `psql`.
pub async fn detect_engine(session: &dyn RemoteSession) -> Result<DatabaseEngine> {
    info!("Determining database type.");
    ensure_connected(session)?;

    let mysql = session.exec("mysql --version 2>&1").await?;
    if probe_matches(&mysql.text, "mysql") {
        info!("Database type determined: MySQL.");
        return Ok(DatabaseEngine::MySql);
    }

    let psql = session.exec("psql --version 2>&1").await?;
    if probe_matches(&psql.text, "psql") {
        info!("Database type determined: PostgreSQL.");
        return Ok(DatabaseEngine::PostgreSql);
    }

    error!("No supported database found on the remote server.");
    Err(BackupError::Dump(
        "No supported database found on the remote server.".to_string(),
    ))
}

/// Composes the engine specific dump command with every component quoted.
pub fn build_dump_command(engine: DatabaseEngine, request: &DumpRequest<'_>, target_path: &str) -> String {
    let database = quote(request.database_name);
    let target = quote(target_path);

    match engine {
        DatabaseEngine::MySql => {
            let mut command = format!("MYSQL_PWD={} mysqldump", quote(request.password));
            if let Some(user) = request.username {
                command.push_str(&format!(" {}", quote(&format!("--user={}", user))));
            }
            command.push_str(&format!(" {}", database));
            for table in request.excluded_tables {
                let flag = format!("--ignore-table={}.{}", request.database_name, table);
                command.push_str(&format!(" {}", quote(&flag)));
            }
            command.push_str(&format!(" > {}", target));
            command
        }
        DatabaseEngine::PostgreSql => {
            let mut command = format!("PGPASSWORD={} pg_dump", quote(request.password));
            if let Some(user) = request.username {
                command.push_str(&format!(" {}", quote(&format!("--username={}", user))));
            }
            command.push_str(&format!(" {}", database));
            for table in request.excluded_tables {
                command.push_str(&format!(" -T {}", quote(table)));
            }
            command.push_str(&format!(" --format=custom > {}", target));
            command
        }
    }
}

fn reports_failure(output: &str) -> bool {
    let lowered = output.to_ascii_lowercase();
    lowered.contains("error") || lowered.contains("failed")
}

/// Dumps the database to `target_path` on the remote host and checks the result.
pub async fn dump_database(
    session: &dyn RemoteSession,
    engine: DatabaseEngine,
    target_path: &str,
    request: &DumpRequest<'_>,
) -> Result<()> {
    info!(database_type = %engine, remote_dump_path = target_path, "Dumping remote database.");
    ensure_connected(session)?;

    if !request.excluded_tables.is_empty() {
        debug!(tables = ?request.excluded_tables, "Excluding tables from the database dump.");
    }

    let command = build_dump_command(engine, request, target_path);
    let output = session.exec(&command).await?;
    debug!(output = %output.text, exit_status = ?output.exit_status, "Database dump command output.");

    if !output.exited_cleanly() || reports_failure(&output.text) {
        error!(output = %output.text, "Failed to dump the database.");
        return Err(BackupError::Dump(format!(
            "Failed to dump the database: {}",
            output.trimmed()
        )));
    }

    if !is_non_empty_file(session, target_path).await? {
        error!(remote_dump_path = target_path, "Database dump file was not created or is empty.");
        return Err(BackupError::Dump(
            "Database dump file was not created or is empty.".to_string(),
        ));
    }

    info!(remote_dump_path = target_path, "Database dump completed successfully.");
    Ok(())
}
