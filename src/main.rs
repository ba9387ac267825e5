use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conductor::conductor_config::RunMode;
use conductor::config::Config;
use conductor::errors::StateError;
use conductor::exit_codes;
use conductor::logging::{self, LoggingOptions};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Phase orchestration and recovery engine")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .conductor directory with default config and example phases
    Init,
    /// Run eligible phases in dependency order
    Run {
        /// Run only this phase
        #[arg(short, long)]
        phase: Option<u32>,
        /// Recover stuck phases first and retry failed ones
        #[arg(long)]
        resume: bool,
        /// automated, manual or dry-run (defaults to conductor.toml)
        #[arg(long)]
        mode: Option<RunMode>,
        /// Run even if the last session recovery reported errors
        #[arg(long)]
        force: bool,
    },
    /// Mark phases stuck in progress as failed
    Recover {
        /// Only report stuck phases
        #[arg(long)]
        dry_run: bool,
        /// In-progress age after which a phase counts as stuck
        #[arg(long)]
        timeout_hours: Option<f64>,
    },
    /// Create, list or restore state snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },
    /// Restore a checkpoint (the latest by default) and validate the result
    RecoverSession {
        name: Option<String>,
    },
    /// Show phase records, the scheduler verdict and stuck phases
    Status,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Start an orchestrator in the background unless one is running
    EnsureRunning {
        #[arg(long)]
        mode: Option<RunMode>,
        #[arg(long)]
        resume: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum SnapshotCommands {
    /// Snapshot the current state
    Create { name: Option<String> },
    /// List snapshots, newest first
    List,
    /// Replace the current state with a snapshot
    Restore { name: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let code = match execute(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), e);
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

/// Set up logging and dispatch. The log guard lives until this returns so
/// buffered file output is flushed before the process exits.
async fn execute(cli: &Cli) -> Result<i32> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = Config::new(project_dir, cli.verbose)?;

    let mut options =
        LoggingOptions::from_section(&config.toml().logging, cli.verbose, config.log_dir.clone());
    if !config.conductor_dir.is_dir() {
        options.log_dir = None;
    }
    let _guard = logging::init(&options)?;

    let result = dispatch(cli, &config).await;
    if let Err(e) = &result {
        tracing::error!(error = %format!("{:#}", e), "command failed");
    }
    result
}

async fn dispatch(cli: &Cli, config: &Config) -> Result<i32> {
    match &cli.command {
        Commands::Init => cmd::cmd_init(&config.project_dir),
        Commands::Run {
            phase,
            resume,
            mode,
            force,
        } => {
            let args = cmd::RunArgs {
                phase: *phase,
                resume: *resume,
                mode: *mode,
                force: *force,
            };
            cmd::cmd_run(config, args).await
        }
        Commands::Recover {
            dry_run,
            timeout_hours,
        } => cmd::cmd_recover(config, *dry_run, *timeout_hours),
        Commands::Snapshot { command } => cmd::cmd_snapshot(config, command.clone()),
        Commands::RecoverSession { name } => cmd::cmd_recover_session(config, name.as_deref()),
        Commands::Status => cmd::cmd_status(config),
        Commands::Config { command } => cmd::cmd_config(config, command.clone()),
        Commands::EnsureRunning { mode, resume } => {
            cmd::cmd_ensure_running(config, *mode, *resume)
        }
    }
}

fn exit_code_for(error: &anyhow::Error) -> i32 {
    let lock_held = error
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<StateError>(), Some(StateError::LockHeld { .. })));
    if lock_held {
        exit_codes::LOCK_HELD
    } else {
        exit_codes::HARD_FAILURE
    }
}
