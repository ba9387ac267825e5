use crate::criteria::ValidationReport;
use crate::phase::PhaseConfig;
use crate::runner::PhaseOutcome;
use crate::scheduler::Eligibility;
use crate::ui::icons::{BLOCKER, CHECK, CLOCK, CROSS, RUNNING, SKIP, SNAPSHOT, SPARKLE, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Terminal UI for a pipeline run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Phase bar: how many phases of the plan are complete
/// - Executor bar: spinner while the current executor runs
///
/// When stderr is not a terminal the bars are hidden and every line is
/// printed to stdout instead, so piped and captured output stays complete.
pub struct PipelineUI {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    executor_bar: ProgressBar,
    verbose: bool,
}

impl PipelineUI {
    /// Create the UI sized for `total_phases`.
    pub fn new(total_phases: u64, verbose: bool) -> Self {
        Self::with_multi(MultiProgress::new(), total_phases, verbose)
    }

    /// A UI that never draws bars; lines still go to stdout.
    pub fn hidden(total_phases: u64) -> Self {
        Self::with_multi(
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            total_phases,
            false,
        )
    }

    fn with_multi(multi: MultiProgress, total_phases: u64, verbose: bool) -> Self {
        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let phase_bar = multi.add(ProgressBar::new(total_phases));
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");

        let executor_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
            .expect("progress bar template is a valid static string");

        let executor_bar = multi.add(ProgressBar::new_spinner());
        executor_bar.set_style(executor_style);
        executor_bar.set_prefix("   Run");

        Self {
            multi,
            phase_bar,
            executor_bar,
            verbose,
        }
    }

    /// Print a line above the bars, or straight to stdout when they are hidden.
    pub fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.is_hidden() || self.multi.println(msg.as_ref()).is_err() {
            println!("{}", msg.as_ref());
        }
    }

    /// Account for phases that were already complete before this run.
    pub fn set_completed(&self, completed: u64) {
        self.phase_bar.set_position(completed);
    }

    pub fn print_separator(&self) {
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
    }

    /// Header block printed before a phase launches.
    pub fn print_phase_header(&self, phase: &PhaseConfig, executor: Option<&Path>, output: &Path) {
        self.print_line("");
        self.print_separator();
        self.print_line(format!(
            "{} Phase {}: {}",
            RUNNING,
            style(phase.phase).yellow().bold(),
            style(&phase.name).bold()
        ));
        self.print_separator();
        let executor = match executor {
            Some(path) => path.display().to_string(),
            None => style("(not found)").dim().to_string(),
        };
        self.print_line(format!("  Executor: {}", executor));
        self.print_line(format!("  Output:   {}", style(output.display()).dim()));
        self.print_line(format!(
            "  {}Timeout: {}",
            CLOCK,
            format_duration(Duration::from_secs(phase.timeout_seconds))
        ));
        if !phase.dependencies.is_empty() {
            self.print_line(format!("  Depends on: {}", join_phases(&phase.dependencies)));
        }
        self.print_line("");
    }

    /// Start the executor spinner for `phase`.
    pub fn start_phase(&self, phase: u32, name: &str) {
        self.phase_bar
            .set_message(format!("{}: {}", style(phase).yellow(), name));
        self.executor_bar.reset_elapsed();
        self.executor_bar
            .set_message(format!("phase {} executor", style(phase).cyan()));
        self.executor_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    /// Advance the phase bar for a successful outcome.
    pub fn phase_complete(&self, outcome: &PhaseOutcome) {
        self.phase_bar.inc(1);
        if let Some(note) = &outcome.note {
            self.executor_bar.finish_with_message(format!(
                "{}Phase {} skipped: {}",
                SKIP, outcome.phase, note
            ));
            self.print_line(format!(
                "{}Phase {} marked complete ({})",
                SKIP,
                style(outcome.phase).yellow().bold(),
                note
            ));
            return;
        }
        self.executor_bar
            .finish_with_message(format!("{}Phase {} executor exited 0", CHECK, outcome.phase));
        self.print_line(format!(
            "\n{}Phase {} complete in {}\n",
            SPARKLE,
            style(outcome.phase).green().bold(),
            format_duration(outcome.duration)
        ));
        if self.verbose && !outcome.stdout.trim().is_empty() {
            for line in outcome.stdout.lines() {
                self.print_line(format!("    {}", style(line).dim()));
            }
        }
    }

    /// Failure banner plus the full error trail. The phase bar does not advance.
    pub fn phase_failed(&self, outcome: &PhaseOutcome) {
        let kind = outcome
            .failure
            .map(|k| k.as_str().to_string())
            .unwrap_or_else(|| "failed".to_string());
        self.executor_bar
            .finish_with_message(format!("{}Phase {} {}", CROSS, outcome.phase, kind));
        self.print_line(format!(
            "\n{}Phase {} failed ({}) after {}",
            CROSS,
            style(outcome.phase).red().bold(),
            kind,
            format_duration(outcome.duration)
        ));
        for error in &outcome.errors {
            self.print_line(format!("    {}", style(error).red()));
        }
        self.print_line("");
    }

    /// Advisory validation report for a completed phase.
    pub fn show_validation(&self, phase: u32, report: &ValidationReport) {
        if report.valid {
            if self.verbose {
                self.print_line(format!("  {}Phase {} success criteria met", CHECK, phase));
            }
        } else {
            self.print_line(format!(
                "  {}Phase {} completed but success criteria failed:",
                WARN,
                style(phase).yellow().bold()
            ));
            for error in &report.errors {
                self.print_line(format!("    - {}", style(error).yellow()));
            }
        }
        for warning in &report.warnings {
            self.print_line(format!("    {}", style(warning).dim()));
        }
    }

    pub fn show_checkpoint(&self, name: &str) {
        self.print_line(format!("  {}Checkpoint {}", SNAPSHOT, style(name).cyan()));
    }

    /// Phases forced to `failed` by stuck-phase recovery before the run.
    pub fn show_recovered(&self, phases: &[u32]) {
        if phases.is_empty() {
            return;
        }
        self.print_line(format!(
            "{}Recovered stuck phase(s) {}; they will be retried",
            WARN,
            join_phases(phases)
        ));
    }

    /// Where the pipeline stopped and why, with the blocking phase's errors.
    pub fn show_blocked(&self, verdict: &Eligibility, errors: &[String]) {
        self.print_line(format!(
            "{}Pipeline {}",
            BLOCKER,
            style(verdict).red().bold()
        ));
        for error in errors {
            self.print_line(format!("    {}", error));
        }
    }

    /// How long the blocking phase has been in progress, with the way out.
    pub fn show_in_progress(&self, phase: u32, elapsed: Option<chrono::Duration>) {
        let line = match elapsed {
            Some(elapsed) => format!(
                "  {}Phase {} in progress for {:.2} hours",
                CLOCK,
                phase,
                elapsed.num_milliseconds() as f64 / 3_600_000.0
            ),
            None => format!("  {}Phase {} in progress with no start time", CLOCK, phase),
        };
        self.print_line(line);
        self.print_line(format!(
            "  Run {} to mark it failed, or {} to recover and retry",
            style("conductor recover").cyan(),
            style("conductor run --resume").cyan()
        ));
    }

    /// One dry-run plan entry.
    pub fn show_planned(&self, phase: &PhaseConfig, executor: Option<&Path>, output: &Path) {
        let executor = match executor {
            Some(path) => path.display().to_string(),
            None => "(executor not found)".to_string(),
        };
        self.print_line(format!(
            "  {} {:<28} {:>8}  {} -> {}",
            style(format!("{:>3}", phase.phase)).yellow(),
            phase.name,
            format_duration(Duration::from_secs(phase.timeout_seconds)),
            executor,
            style(output.display()).dim()
        ));
    }

    /// Stop all bars with a final message on the phase bar.
    pub fn finish(&self, message: &str) {
        if !self.executor_bar.is_finished() {
            self.executor_bar.finish_and_clear();
        }
        self.phase_bar.finish_with_message(message.to_string());
    }
}

/// `Xs`, `Xm Ys` or `Xh Ym`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

fn join_phases(phases: &[u32]) -> String {
    phases
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
