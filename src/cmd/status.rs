//! Pipeline status: `conductor status`.

use anyhow::Result;
use conductor::clock::system_clock;
use conductor::config::Config;
use conductor::exit_codes;
use conductor::init::is_initialized;
use conductor::orchestrator::VALIDATION_KEY;
use conductor::recovery::{blocking_recovery_errors, find_stuck_phases};
use conductor::runner::LAST_FAILURE_KIND;
use conductor::state::{PhaseRecord, PhaseStatus, StateStore};
use console::style;
use std::collections::BTreeSet;

pub fn cmd_status(config: &Config) -> Result<i32> {
    println!();
    println!("Conductor Status");
    println!("================");
    println!();

    if !is_initialized(&config.project_dir) {
        println!("Project: Not initialized");
        println!();
        println!("Run 'conductor init' to initialize the project.");
        println!();
        return Ok(exit_codes::SUCCESS);
    }

    println!("Project: {}", config.project_dir.display());
    let plan = match config.load_plan() {
        Ok(plan) => {
            println!("Phases:  {} defined in {}", plan.len(), config.phases_file.display());
            Some(plan)
        }
        Err(e) => {
            println!("Phases:  {} ({:#})", style("unavailable").red(), e);
            None
        }
    };

    let store = StateStore::open(&config.state_file, system_clock())?;
    let state = store.state();
    println!();

    let mut numbers: BTreeSet<u32> = state.phases.keys().copied().collect();
    if let Some(plan) = &plan {
        numbers.extend(plan.order().map(|p| p.phase));
    }
    if numbers.is_empty() {
        println!("Execution: Not started");
    }
    for number in &numbers {
        let name = plan
            .as_ref()
            .and_then(|p| p.get(*number))
            .map(|p| p.name.clone())
            .or_else(|| store.phase(*number).map(|r| r.name.clone()))
            .unwrap_or_default();
        match store.phase(*number) {
            Some(record) => print_record(*number, &name, record),
            None => println!(
                "  {:>3}  {:<28} {}",
                number,
                name,
                styled_status(PhaseStatus::Pending)
            ),
        }
    }

    if let Some(plan) = &plan {
        println!();
        println!("Scheduler: {}", plan.next_eligible_phase(&store, false));
    }

    let hours = config.toml().defaults.stuck_timeout_hours;
    let stuck = find_stuck_phases(&store, hours);
    if !stuck.is_empty() {
        println!();
        println!("{} (threshold {} hours):", style("Stuck phases").red().bold(), hours);
        for entry in stuck {
            match entry.elapsed_hours {
                Some(h) => println!("  Phase {}: in progress for {:.2} hours", entry.phase, h),
                None => println!("  Phase {}: in progress with no start time", entry.phase),
            }
        }
        println!("Run 'conductor recover' or 'conductor run --resume'.");
    }

    println!();
    match state.latest_checkpoint() {
        Some(latest) => println!(
            "Checkpoints: {} (latest {} at {})",
            state.checkpoints.len(),
            latest.name,
            latest.timestamp.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("Checkpoints: none"),
    }
    if let Some(errors) = blocking_recovery_errors(state) {
        println!(
            "{} last session recovery was invalid; `run` needs --force",
            style("Recovery:").red().bold()
        );
        for error in errors {
            println!("  - {}", error);
        }
    }
    println!();
    Ok(exit_codes::SUCCESS)
}

fn print_record(number: u32, name: &str, record: &PhaseRecord) {
    let mut line = format!(
        "  {:>3}  {:<28} {}",
        number,
        name,
        styled_status(record.status)
    );
    if let Some(started) = record.started_at {
        line.push_str(&format!("  started {}", started.format("%Y-%m-%d %H:%M:%S")));
    }
    if let Some(completed) = record.completed_at {
        line.push_str(&format!("  finished {}", completed.format("%Y-%m-%d %H:%M:%S")));
    }
    println!("{}", line);

    if let Some(note) = record.metadata.get("note").and_then(|v| v.as_str()) {
        println!("       note: {}", style(note).dim());
    }
    if record.status == PhaseStatus::Failed
        && let Some(kind) = record.metadata.get(LAST_FAILURE_KIND).and_then(|v| v.as_str())
    {
        println!("       last failure: {}", kind);
    }
    if let Some(validation) = record.metadata.get(VALIDATION_KEY)
        && validation.get("valid").and_then(|v| v.as_bool()) == Some(false)
    {
        println!("       {}", style("success criteria not met").yellow());
    }
    for error in &record.errors {
        println!("       {}", style(error).red());
    }
}

fn styled_status(status: PhaseStatus) -> console::StyledObject<&'static str> {
    let text = status.as_str();
    match status {
        PhaseStatus::Completed => style(text).green(),
        PhaseStatus::Failed => style(text).red().bold(),
        PhaseStatus::InProgress => style(text).yellow(),
        PhaseStatus::Pending => style(text).dim(),
    }
}
