//! Recovery commands: `conductor recover` and `conductor recover-session`.

use anyhow::Result;
use conductor::checkpoint::CheckpointManager;
use conductor::clock::system_clock;
use conductor::config::Config;
use conductor::exit_codes;
use conductor::recovery::{RecoveryReport, SessionRecovery, find_stuck_phases, recover_stuck_phases};
use conductor::state::StateStore;
use console::style;

pub fn cmd_recover(config: &Config, dry_run: bool, timeout_hours: Option<f64>) -> Result<i32> {
    let hours = timeout_hours.unwrap_or(config.toml().defaults.stuck_timeout_hours);
    if hours <= 0.0 {
        anyhow::bail!("--timeout-hours must be positive, got {}", hours);
    }
    let clock = system_clock();

    // Dry runs only read state.
    let (_lock, mut store) = if dry_run {
        (None, StateStore::open(&config.state_file, clock)?)
    } else {
        let (lock, store) = super::open_locked(config, clock)?;
        (Some(lock), store)
    };

    let stuck = find_stuck_phases(&store, hours);
    if stuck.is_empty() {
        println!("No stuck phases (threshold {} hours).", hours);
        return Ok(exit_codes::SUCCESS);
    }

    println!("Stuck phases (threshold {} hours):", hours);
    for entry in &stuck {
        let elapsed = match entry.elapsed_hours {
            Some(h) => format!("in progress for {:.2} hours", h),
            None => "in progress with no start time".to_string(),
        };
        println!(
            "  Phase {} {}: {}",
            style(entry.phase).yellow().bold(),
            entry.name,
            elapsed
        );
    }

    let phases = recover_stuck_phases(&mut store, hours, dry_run)?;
    println!();
    if dry_run {
        println!(
            "{} would mark {:?} as failed",
            style("Dry run:").cyan().bold(),
            phases
        );
    } else {
        println!(
            "Marked {:?} as failed. Run `conductor run --resume` to retry.",
            phases
        );
    }
    Ok(exit_codes::SUCCESS)
}

pub fn cmd_recover_session(config: &Config, name: Option<&str>) -> Result<i32> {
    let clock = system_clock();
    let (_lock, mut store) = super::open_locked(config, clock.clone())?;
    let checkpoints = CheckpointManager::new(&config.snapshot_dir, clock);
    let mut recovery = SessionRecovery::new(checkpoints, &config.project_dir);

    if !recovery.recover_from_checkpoint(&mut store, name)? {
        match name {
            Some(name) => eprintln!("Checkpoint '{}' not found; state unchanged.", name),
            None => eprintln!("No checkpoints recorded; nothing to recover."),
        }
        return Ok(exit_codes::HARD_FAILURE);
    }

    let restored = recovery.restored_checkpoint().unwrap_or_default().to_string();
    println!("Recovered session from checkpoint {}", style(&restored).cyan());
    let report = recovery.validate_recovery(&store);
    recovery.record_report(&mut store, &report)?;
    Ok(print_recovery_report(&report))
}

/// Print a validation report and map it to an exit code.
pub(crate) fn print_recovery_report(report: &RecoveryReport) -> i32 {
    for warning in &report.warnings {
        println!("  {} {}", style("warning:").yellow(), warning);
    }
    if report.valid {
        println!("{}", style("Restored state is valid.").green());
        exit_codes::SUCCESS
    } else {
        for error in &report.errors {
            println!("  {} {}", style("error:").red().bold(), error);
        }
        println!(
            "{}",
            style("Restored state is invalid; `conductor run` will refuse to start without --force.")
                .red()
        );
        exit_codes::HARD_FAILURE
    }
}
