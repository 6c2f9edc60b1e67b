//! vaultsync command-line host.
//!
//! Provides one-shot subcommands (sync, pull, push, status, conflict
//! resolution) on top of the trigger coordinator, a `watch` mode that keeps
//! the startup, background and on-save triggers running, and commands to
//! generate and validate the configuration file.

mod signals;
mod style;
mod watch;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use vaultsync_core::config::SyncConfig;
use vaultsync_core::conflict::ResolutionStrategy;
use vaultsync_core::coordinator::{TriggerCoordinator, TriggerResponse};
use vaultsync_core::git::remote_url::mask_credentials;
use vaultsync_core::git::GitClient;
use vaultsync_core::models::{SyncInfo, TriggerSource};
use vaultsync_core::sync_engine::SyncController;

/// Exit code for a cycle that stopped on conflicts.
const EXIT_CONFLICT: u8 = 2;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// vaultsync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "vaultsync",
    version,
    about = "Keep a local notes vault in sync with a remote Git repository"
)]
struct Cli {
    /// Path to the TOML configuration file
    /// (default: <config dir>/vaultsync/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a configuration file from the template.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Check configuration, credentials and remote reachability.
    Validate,

    /// Show repository and sync status.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run a full sync cycle: pull, commit local changes, push.
    Sync {
        /// Files to name in the commit message (all changes are committed).
        files: Vec<String>,
    },

    /// Pull remote changes without committing or pushing.
    Pull,

    /// Commit and push local changes without pulling.
    Push {
        /// Files to name in the commit message.
        files: Vec<String>,
    },

    /// Resolve every conflicted file and complete the merge.
    Resolve {
        /// keep-local or keep-remote.
        strategy: ResolutionStrategy,
    },

    /// Discard an in-progress merge.
    AbortMerge,

    /// Keep running: startup sync, periodic background sync, and on-save
    /// syncs.
    Watch {
        /// Read host events (e.g. `save notes/today.md`) from stdin.
        #[arg(long)]
        stdin_events: bool,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.clone().unwrap_or_else(SyncConfig::default_path);

    if let Commands::Init { force } = cli.command {
        init_logging("warn", None);
        return cmd_init(&config_path, force).map(|()| ExitCode::SUCCESS);
    }

    let config = load_config(&config_path)?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.log_level.clone());

    let watching = matches!(cli.command, Commands::Watch { .. });
    let _guard = init_logging(&level, watching.then_some(config.logging.data_dir.as_path()));

    let coordinator = build_coordinator(config.clone());

    match cli.command {
        Commands::Init { .. } => Ok(ExitCode::SUCCESS),
        Commands::Validate => cmd_validate(&coordinator, &config, &config_path).await,
        Commands::Status { json } => cmd_status(&coordinator, json).await,
        Commands::Sync { files } => {
            let files = (!files.is_empty()).then_some(files);
            report(coordinator.request_sync(TriggerSource::Manual, files).await)
        }
        Commands::Pull => report(coordinator.request_pull().await),
        Commands::Push { files } => {
            let files = (!files.is_empty()).then_some(files);
            report(coordinator.request_push(files).await)
        }
        Commands::Resolve { strategy } => {
            report(coordinator.request_resolve_conflicts(strategy).await)
        }
        Commands::AbortMerge => report(coordinator.request_abort_merge().await),
        Commands::Watch { stdin_events } => {
            let shutdown = signals::setup_signal_handlers()?;
            watch::run(coordinator, shutdown, stdin_events).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

/// Initialize tracing. `RUST_LOG` overrides `level`. With a `log_dir`, a
/// daily-rolling `vaultsync.log` is written there as well; the returned guard
/// flushes it on drop.
fn init_logging(level: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file, guard) = match log_dir.map(|dir| std::fs::create_dir_all(dir).map(|()| dir)) {
        Some(Ok(dir)) => {
            let appender = tracing_appender::rolling::daily(dir, "vaultsync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            eprintln!("{}", style::warn(&format!("file logging disabled: {e}")));
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    guard
}

fn load_config(path: &Path) -> Result<SyncConfig> {
    let mut config = SyncConfig::load_from_file(path).with_context(|| {
        format!(
            "failed to load configuration file {} (run `vaultsync init` to create one)",
            path.display()
        )
    })?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    Ok(config)
}

fn build_coordinator(config: SyncConfig) -> TriggerCoordinator<GitClient> {
    let client = GitClient::new(config.repository.resolved_path());
    TriggerCoordinator::new(SyncController::new(config, client))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "file already exists: {}. Use --force to overwrite it.",
            output.display()
        );
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).context("failed to create config directory")?;
    }
    std::fs::write(output, SyncConfig::default_template())
        .context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Configuration written to {}", output.display()))
    );
    println!();
    println!("Next steps:");
    println!("  1. Set the vault path, remote URL and your name and email");
    println!("  2. Export VAULTSYNC_TOKEN or configure an SSH key");
    println!(
        "  3. Validate with: vaultsync validate --config {}",
        output.display()
    );
    Ok(())
}

async fn cmd_validate(
    coordinator: &TriggerCoordinator<GitClient>,
    config: &SyncConfig,
    config_path: &Path,
) -> Result<ExitCode> {
    println!("Validating configuration: {}", config_path.display());
    println!();
    println!("  Vault     : {}", config.repository.resolved_path().display());
    println!("  Branch    : {}", config.repository.branch);
    println!("  Remote    : {}", mask_credentials(&config.remote.url));
    println!("  Auth mode : {}", config.auth.mode);
    println!(
        "  Token     : {}",
        if config.auth.token().is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!();

    match coordinator.request_validate().await {
        TriggerResponse::Validation(report) if report.valid => {
            println!("{}", style::success("Configuration is valid."));
            Ok(ExitCode::SUCCESS)
        }
        TriggerResponse::Validation(report) => {
            for problem in &report.errors {
                println!("  {}", style::error(problem));
            }
            anyhow::bail!("configuration validation failed");
        }
        other => report(other),
    }
}

async fn cmd_status(coordinator: &TriggerCoordinator<GitClient>, json: bool) -> Result<ExitCode> {
    let info = match coordinator.request_status().await {
        TriggerResponse::Status(info) => info,
        other => return report(other),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("failed to serialize status")?
        );
    } else {
        print_status(&info);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_status(info: &SyncInfo) {
    println!();
    println!("{}", style::header("vaultsync"));
    println!();

    let state = if info.in_flight {
        format!("{} ({})", style::status_syncing(), info.phase)
    } else {
        style::status_idle()
    };
    let last_sync = info
        .last_sync_at
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    let latest = info
        .latest_commit
        .as_ref()
        .map(|c| format!("{} {}", &c.sha[..7.min(c.sha.len())], c.summary))
        .unwrap_or_else(|| "none".to_string());

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.add_row(vec![Cell::new("State"), Cell::new(state)]);
    table.add_row(vec![Cell::new("Branch"), Cell::new(&info.current_branch)]);
    table.add_row(vec![
        Cell::new("Ahead / behind"),
        Cell::new(format!("{} / {}", info.ahead, info.behind)),
    ]);
    table.add_row(vec![
        Cell::new("Changed files"),
        Cell::new(info.changed_paths.len()),
    ]);
    table.add_row(vec![
        Cell::new("Merge in progress"),
        Cell::new(if info.merging { "yes" } else { "no" }),
    ]);
    table.add_row(vec![Cell::new("Latest commit"), Cell::new(latest)]);
    table.add_row(vec![Cell::new("Last sync"), Cell::new(last_sync)]);
    if let Some(outcome) = &info.last_outcome {
        table.add_row(vec![Cell::new("Last outcome"), Cell::new(outcome)]);
    }
    println!("{table}");

    if !info.conflicted_paths.is_empty() {
        println!();
        println!(
            "{}",
            style::warn(&format!(
                "{} conflicted file(s); run `vaultsync resolve keep-local|keep-remote`",
                info.conflicted_paths.len()
            ))
        );
        for path in &info.conflicted_paths {
            println!("  {}", path);
        }
    }
    println!();
}

/// Print a request's outcome and map it to an exit code.
fn report(response: TriggerResponse) -> Result<ExitCode> {
    match response {
        TriggerResponse::Failed(e) => Err(anyhow::Error::new(e)),
        TriggerResponse::Completed(outcome) => {
            println!("{}", style::response(&TriggerResponse::Completed(outcome.clone())));
            for warning in &outcome.warnings {
                println!("  {}", style::warn(warning));
            }
            if outcome.conflict {
                for path in &outcome.conflicted_files {
                    println!("  {}", path);
                }
                return Ok(ExitCode::from(EXIT_CONFLICT));
            }
            if let Some(sha) = &outcome.commit {
                println!("  {}", style::dim(&format!("commit {}", &sha[..7.min(sha.len())])));
            }
            Ok(ExitCode::SUCCESS)
        }
        busy @ TriggerResponse::Busy => anyhow::bail!("{}", busy.message()),
        other => {
            println!("{}", style::response(&other));
            Ok(ExitCode::SUCCESS)
        }
    }
}
