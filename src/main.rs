//! Remote Server Backup Tool
//!
//! Dumps databases or archives directories on remote hosts over SSH and ships
//! the artifacts to S3-compatible or local storage.

// serverbackup/src/main.rs
mod backup;
mod config;
mod destination;
mod errors;
mod records;
mod remote;
mod utils;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

use backup::{BackupOrchestrator, RunOutcome, dispatch_ready_tasks};
use config::AppConfig;
use destination::BackendStoreProvider;
use records::{InMemoryRepository, TaskRepository, TracingNotifier, set_task_paused};
use remote::ssh::SshConnector;

#[derive(Parser)]
#[command(name = "serverbackup")]
#[command(about = "Back up remote servers to object storage")]
#[command(version)]
struct Cli {
    /// Path to config.json
    #[arg(short, long, env = "SERVERBACKUP_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backup task and print its log
    Run {
        /// Backup task ID
        task_id: u64,
    },
    /// Run every task that is ready, serializing runs per server
    RunAll,
    /// Load and validate the configuration
    CheckConfig,
    /// Stop a task from being dispatched until it is resumed
    Pause {
        /// Backup task ID
        task_id: u64,
    },
    /// Make a paused task ready again
    Resume {
        /// Backup task ID
        task_id: u64,
    },
}

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run_app(cli).await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(env_filter).with_target(false).init();
}

async fn run_app(cli: Cli) -> Result<()> {
    if let Err(e) = dotenv::dotenv() {
        tracing::debug!(error = %e, "No .env file loaded.");
    }

    let app_config = AppConfig::load_from_json(&cli.config).context(format!(
        "Failed to load application configuration from {}",
        cli.config.display()
    ))?;

    match cli.command {
        Commands::CheckConfig => check_config(&app_config, &cli.config),
        Commands::Pause { task_id } => change_pause_state(app_config, &cli.config, task_id, true).await,
        Commands::Resume { task_id } => change_pause_state(app_config, &cli.config, task_id, false).await,
        Commands::Run { task_id } => {
            println!("🚀 Starting backup task {}...", task_id);
            let orchestrator = build_orchestrator(app_config)?;
            tracing::info!(environment = %orchestrator.settings().environment, "Orchestrator ready.");
            let outcome = orchestrator
                .run_task(task_id)
                .await
                .context(format!("Backup task {} aborted", task_id))?;
            print_log(orchestrator.repository().as_ref(), task_id, outcome.log_id()).await?;
            match outcome {
                RunOutcome::Completed { file_name, elapsed, .. } => {
                    println!("📦 {} uploaded in {:.2}s", file_name, elapsed.as_secs_f64());
                    Ok(())
                }
                RunOutcome::Failed { message, .. } => bail!("Backup task {} failed: {}", task_id, message),
            }
        }
        Commands::RunAll => {
            println!("🚀 Dispatching ready backup tasks...");
            let orchestrator = Arc::new(build_orchestrator(app_config)?);
            let results = dispatch_ready_tasks(orchestrator)
                .await
                .context("Failed to dispatch backup tasks")?;

            let mut failed = 0;
            for (task_id, result) in &results {
                match result {
                    Ok(RunOutcome::Completed { file_name, .. }) => println!("✓ Task {}: {}", task_id, file_name),
                    Ok(RunOutcome::Failed { message, .. }) => {
                        failed += 1;
                        eprintln!("⚠️ Task {}: {}", task_id, message);
                    }
                    Err(e) => {
                        failed += 1;
                        eprintln!("⚠️ Task {}: {}", task_id, e);
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} backup tasks failed", failed, results.len());
            }
            println!("{} backup task(s) completed.", results.len());
            Ok(())
        }
    }
}

fn build_orchestrator(app_config: AppConfig) -> Result<BackupOrchestrator> {
    let settings = Arc::new(app_config.ssh);
    let orchestrator = BackupOrchestrator::new(
        Arc::clone(&settings),
        Arc::new(InMemoryRepository::from_inventory(app_config.inventory)),
        Arc::new(TracingNotifier),
        Arc::new(SshConnector::new(Arc::clone(&settings))),
        Arc::new(BackendStoreProvider),
    )
    .context("Invalid SSH configuration")?;
    Ok(orchestrator.with_remote_work_dir(app_config.remote_work_dir))
}

fn check_config(app_config: &AppConfig, path: &Path) -> Result<()> {
    println!("🔍 Checking {}", path.display());
    app_config.ssh.validate().context("Invalid SSH configuration")?;

    let inventory = &app_config.inventory;
    println!("Environment: {}", app_config.ssh.environment);
    println!("SSH key: {}", app_config.ssh.private_key_path.display());
    println!("Remote work dir: {}", app_config.remote_work_dir);
    println!(
        "{} user(s), {} server(s), {} destination(s), {} task(s)",
        inventory.users.len(),
        inventory.remote_servers.len(),
        inventory.backup_destinations.len(),
        inventory.backup_tasks.len()
    );
    for task in &inventory.backup_tasks {
        println!(
            "  #{} {} [{}] {} -> destination {}",
            task.id,
            task.label,
            task.status,
            task.mode.artifact_extension(),
            task.backup_destination_id
        );
    }
    Ok(())
}

async fn change_pause_state(app_config: AppConfig, path: &Path, task_id: u64, paused: bool) -> Result<()> {
    let repository = InMemoryRepository::from_inventory(app_config.inventory);
    let changed = set_task_paused(&repository, task_id, paused)
        .await
        .context(format!("Failed to update backup task {}", task_id))?;

    match changed {
        Some(status) => {
            config::save_task_status(path, task_id, status)?;
            println!("Task {} is now {}.", task_id, status);
        }
        None => {
            let task = repository.find_task(task_id).await?;
            println!("Task {} is already {}; nothing to do.", task_id, task.status);
        }
    }
    Ok(())
}

async fn print_log(repository: &dyn TaskRepository, task_id: u64, log_id: u64) -> Result<()> {
    let logs = repository.logs_for_task(task_id).await?;
    if let Some(log) = logs.iter().find(|log| log.id == log_id) {
        print!("{}", log.output);
    }
    Ok(())
}
