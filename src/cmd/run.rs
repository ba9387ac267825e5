//! Pipeline execution: `conductor run`.

use anyhow::Result;
use conductor::clock::system_clock;
use conductor::conductor_config::RunMode;
use conductor::config::Config;
use conductor::orchestrator::{HaltReason, Orchestrator, RunOptions, RunSummary};
use conductor::state::StateStore;
use console::style;

#[derive(Debug, Clone, Copy)]
pub struct RunArgs {
    pub phase: Option<u32>,
    pub resume: bool,
    pub mode: Option<RunMode>,
    pub force: bool,
}

pub async fn cmd_run(config: &Config, args: RunArgs) -> Result<i32> {
    let options = RunOptions {
        mode: args.mode.unwrap_or(config.toml().defaults.mode),
        resume: args.resume,
        phase: args.phase,
        force: args.force,
    };

    let clock = system_clock();
    let orchestrator = Orchestrator::new(config.clone(), clock.clone())?;

    // A dry run reads state but never writes it, so it does not need the lock.
    let summary = if options.mode == RunMode::DryRun {
        let mut store = StateStore::open(&config.state_file, clock)?;
        orchestrator.run(&mut store, &options).await?
    } else {
        let (_lock, mut store) = super::open_locked(config, clock)?;
        orchestrator.run(&mut store, &options).await?
    };

    print_summary(&summary);
    Ok(summary.exit_code())
}

fn print_summary(summary: &RunSummary) {
    let ran = summary.executed.len();
    let failed = summary.executed.iter().filter(|o| !o.success).count();
    let invalid = summary.validations.values().filter(|r| !r.valid).count();

    let headline = match &summary.halt {
        HaltReason::Complete => style("Pipeline complete".to_string()).green().bold(),
        HaltReason::DryRun => style("Dry run finished, nothing executed".to_string()).cyan(),
        HaltReason::SinglePhase { phase, success: true } => {
            style(format!("Phase {} complete", phase)).green().bold()
        }
        HaltReason::SinglePhase { phase, success: false } | HaltReason::PhaseFailed(phase) => {
            style(format!("Phase {} failed", phase)).red().bold()
        }
        HaltReason::Blocked { phase, .. } => {
            style(format!("Pipeline blocked on phase {}", phase)).yellow().bold()
        }
        HaltReason::Declined(phase) => style(format!("Stopped before phase {}", phase)).yellow(),
        HaltReason::RecoveryInvalid(_) => style("Run refused".to_string()).red().bold(),
    };

    println!();
    println!("{}", headline);
    if summary.halt != HaltReason::DryRun {
        println!(
            "  {} phase(s) executed, {} failed, {} with failed success criteria",
            ran, failed, invalid
        );
    }
    if !summary.recovered.is_empty() {
        println!("  recovered stuck phases: {:?}", summary.recovered);
    }
    if let Some(last) = summary.checkpoints.last() {
        println!("  latest checkpoint: {}", last);
    }
}
