//! The orchestration loop: Dependency Scheduler → Phase Runner, one phase at
//! a time, with advisory validation and checkpoints after each completed
//! phase.

use crate::checkpoint::CheckpointManager;
use crate::clock::SharedClock;
use crate::conductor_config::RunMode;
use crate::config::Config;
use crate::criteria::{CriteriaFile, CriteriaValidator, ValidationReport};
use crate::errors::PhaseError;
use crate::exit_codes;
use crate::phase::PhaseConfig;
use crate::recovery::{RECOVERY_KEY, blocking_recovery_errors, find_stuck_phases, recover_stuck_phases};
use crate::runner::{PhaseOutcome, PhaseRunner};
use crate::scheduler::{BlockReason, Eligibility, PhasePlan};
use crate::state::{PhaseStatus, StateStore};
use crate::ui::PipelineUI;
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use std::collections::{BTreeMap, BTreeSet};

/// Metadata key for a completed phase's advisory validation report.
pub const VALIDATION_KEY: &str = "validation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Recover stuck phases first and retry failed ones
    pub resume: bool,
    /// Run only this phase
    pub phase: Option<u32>,
    /// Start even if the last session recovery was invalid
    pub force: bool,
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum HaltReason {
    Complete,
    PhaseFailed(u32),
    Blocked { phase: u32, reason: BlockReason },
    Declined(u32),
    /// The last session recovery reported errors and `--force` was not given.
    RecoveryInvalid(Vec<String>),
    DryRun,
    SinglePhase { phase: u32, success: bool },
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub executed: Vec<PhaseOutcome>,
    pub recovered: Vec<u32>,
    pub validations: BTreeMap<u32, ValidationReport>,
    pub checkpoints: Vec<String>,
    pub halt: HaltReason,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            executed: Vec::new(),
            recovered: Vec::new(),
            validations: BTreeMap::new(),
            checkpoints: Vec::new(),
            halt: HaltReason::Complete,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match &self.halt {
            HaltReason::Complete | HaltReason::DryRun => exit_codes::SUCCESS,
            HaltReason::SinglePhase { success: true, .. } => exit_codes::SUCCESS,
            HaltReason::SinglePhase { success: false, .. } | HaltReason::PhaseFailed(_) => {
                exit_codes::PHASE_FAILED
            }
            HaltReason::Blocked {
                reason: BlockReason::Failed,
                ..
            } => exit_codes::PHASE_FAILED,
            HaltReason::Blocked { .. } | HaltReason::Declined(_) => exit_codes::INCOMPLETE,
            HaltReason::RecoveryInvalid(_) => exit_codes::HARD_FAILURE,
        }
    }
}

/// Decides whether a phase may start in manual mode.
pub trait PhaseApproval: Send + Sync {
    fn approve(&self, phase: &PhaseConfig) -> Result<bool>;
}

/// Interactive confirmation on the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptApproval;

impl PhaseApproval for PromptApproval {
    fn approve(&self, phase: &PhaseConfig) -> Result<bool> {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Run phase {} ({})?", phase.phase, phase.name))
            .default(true)
            .interact()
            .context("Failed to read confirmation")
    }
}

pub struct Orchestrator {
    config: Config,
    plan: PhasePlan,
    criteria: CriteriaFile,
    runner: PhaseRunner,
    validator: CriteriaValidator,
    checkpoints: CheckpointManager,
    approval: Box<dyn PhaseApproval>,
    ui: PipelineUI,
}

impl Orchestrator {
    /// Load the plan and success criteria named by `config`.
    pub fn new(config: Config, clock: SharedClock) -> Result<Self> {
        let plan = config.load_plan()?;
        let criteria = config.load_criteria()?;
        Ok(Self::from_parts(config, plan, criteria, clock))
    }

    pub fn from_parts(
        config: Config,
        plan: PhasePlan,
        criteria: CriteriaFile,
        clock: SharedClock,
    ) -> Self {
        let ui = PipelineUI::new(plan.len() as u64, config.verbose);
        Self {
            runner: PhaseRunner::from_config(&config),
            validator: CriteriaValidator::new(&config.project_dir),
            checkpoints: CheckpointManager::new(&config.snapshot_dir, clock),
            approval: Box::new(PromptApproval),
            config,
            plan,
            criteria,
            ui,
        }
    }

    pub fn with_approval(mut self, approval: Box<dyn PhaseApproval>) -> Self {
        self.approval = approval;
        self
    }

    pub fn with_ui(mut self, ui: PipelineUI) -> Self {
        self.ui = ui;
        self
    }

    pub fn plan(&self) -> &PhasePlan {
        &self.plan
    }

    /// Drive the pipeline until it completes, a phase fails, or nothing is
    /// eligible.
    pub async fn run(&self, store: &mut StateStore, options: &RunOptions) -> Result<RunSummary> {
        let mut summary = RunSummary::new();
        tracing::info!(
            mode = %options.mode,
            resume = options.resume,
            phases = self.plan.len(),
            "pipeline run started"
        );

        if options.mode == RunMode::DryRun {
            self.dry_run(store, options);
            summary.halt = HaltReason::DryRun;
            return Ok(summary);
        }

        if let Some(errors) = blocking_recovery_errors(store.state()) {
            if !options.force {
                tracing::error!(?errors, "last session recovery was invalid, refusing to run");
                self.ui.print_line(format!(
                    "{} the last session recovery reported errors; rerun with --force to continue:",
                    style("Refusing to resume:").red().bold()
                ));
                for error in &errors {
                    self.ui.print_line(format!("    {}", error));
                }
                summary.halt = HaltReason::RecoveryInvalid(errors);
                return Ok(summary);
            }
            tracing::warn!("ignoring invalid session recovery (--force)");
            store.remove_value(RECOVERY_KEY)?;
        }

        if options.resume {
            let hours = self.config.toml().defaults.stuck_timeout_hours;
            summary.recovered = recover_stuck_phases(store, hours, false)?;
            self.ui.show_recovered(&summary.recovered);
        }

        if let Some(phase) = options.phase {
            self.run_single(store, phase, options, &mut summary).await?;
            self.ui.finish("done");
            return Ok(summary);
        }

        let completed = self
            .plan
            .order()
            .filter(|p| store.get_phase_status(p.phase) == PhaseStatus::Completed)
            .count();
        self.ui.set_completed(completed as u64);

        loop {
            let verdict = self.plan.next_eligible_phase(store, options.resume);
            let number = match &verdict {
                Eligibility::Ready(number) => *number,
                Eligibility::Complete => {
                    summary.halt = HaltReason::Complete;
                    break;
                }
                Eligibility::Blocked { phase, reason } => {
                    let record = store.phase(*phase);
                    let errors = record.map(|r| r.errors.clone()).unwrap_or_default();
                    tracing::warn!(phase, %verdict, "pipeline blocked");
                    self.ui.show_blocked(&verdict, &errors);
                    if *reason == BlockReason::InProgress {
                        let elapsed = record.and_then(|r| r.elapsed_since_start(store.now()));
                        self.ui.show_in_progress(*phase, elapsed);
                    }
                    summary.halt = HaltReason::Blocked {
                        phase: *phase,
                        reason: reason.clone(),
                    };
                    break;
                }
            };

            let phase = self.plan.get(number).ok_or(PhaseError::UnknownPhase(number))?;
            if options.mode == RunMode::Manual && !self.approval.approve(phase)? {
                tracing::info!(phase = number, "phase declined");
                summary.halt = HaltReason::Declined(number);
                break;
            }

            let success = self.execute_phase(store, phase, &mut summary).await?;
            if !success {
                summary.halt = HaltReason::PhaseFailed(number);
                break;
            }
        }

        let message = match &summary.halt {
            HaltReason::Complete => "complete".to_string(),
            HaltReason::PhaseFailed(phase) => format!("stopped at phase {}", phase),
            HaltReason::Blocked { phase, .. } => format!("blocked on phase {}", phase),
            HaltReason::Declined(phase) => format!("declined phase {}", phase),
            _ => "stopped".to_string(),
        };
        self.ui.finish(&message);
        tracing::info!(halt = ?summary.halt, executed = summary.executed.len(), "pipeline run finished");
        Ok(summary)
    }

    async fn run_single(
        &self,
        store: &mut StateStore,
        number: u32,
        options: &RunOptions,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let phase = self.plan.get(number).ok_or(PhaseError::UnknownPhase(number))?;

        let waiting_on = self.plan.unmet_dependencies(phase, store);
        if !waiting_on.is_empty() {
            let verdict = Eligibility::Blocked {
                phase: number,
                reason: BlockReason::WaitingOn(waiting_on.clone()),
            };
            self.ui.show_blocked(&verdict, &[]);
            summary.halt = HaltReason::Blocked {
                phase: number,
                reason: BlockReason::WaitingOn(waiting_on),
            };
            return Ok(());
        }

        if options.mode == RunMode::Manual && !self.approval.approve(phase)? {
            summary.halt = HaltReason::Declined(number);
            return Ok(());
        }

        let success = self.execute_phase(store, phase, summary).await?;
        summary.halt = HaltReason::SinglePhase {
            phase: number,
            success,
        };
        Ok(())
    }

    /// Run one phase, then validate and checkpoint it if it completed.
    async fn execute_phase(
        &self,
        store: &mut StateStore,
        phase: &PhaseConfig,
        summary: &mut RunSummary,
    ) -> Result<bool> {
        let executor = self.runner.resolve_executor(phase).ok();
        let output = self.runner.output_path(phase);
        self.ui.print_phase_header(phase, executor.as_deref(), &output);
        self.ui.start_phase(phase.phase, &phase.name);

        let outcome = self.runner.execute(store, phase).await?;
        let success = outcome.success;

        if success {
            self.ui.phase_complete(&outcome);
            if outcome.note.is_none()
                && let Some(criteria) = self.criteria.get(phase.phase)
            {
                let report = self.validator.validate(phase.phase, criteria);
                let value = serde_json::to_value(&report)
                    .context("Failed to serialize validation report")?;
                store.record_metadata(phase.phase, VALIDATION_KEY, value)?;
                self.ui.show_validation(phase.phase, &report);
                summary.validations.insert(phase.phase, report);
            }
            if self.config.toml().defaults.auto_checkpoint {
                let name = self.checkpoints.auto_checkpoint(store, phase.phase)?;
                self.ui.show_checkpoint(&name);
                summary.checkpoints.push(name);
            }
        } else {
            self.ui.phase_failed(&outcome);
        }

        summary.executed.push(outcome);
        Ok(success)
    }

    /// Print the execution order without touching state.
    fn dry_run(&self, store: &StateStore, options: &RunOptions) {
        self.ui.print_line(format!(
            "{} {} phase(s) in execution order",
            style("Dry run:").cyan().bold(),
            self.plan.len()
        ));

        let selected: Vec<&PhaseConfig> = match options.phase {
            Some(number) => self.plan.get(number).into_iter().collect(),
            None => execution_order(&self.plan),
        };
        for phase in selected {
            let executor = self.runner.resolve_executor(phase).ok();
            self.ui
                .show_planned(phase, executor.as_deref(), &self.runner.output_path(phase));
            let status = store.get_phase_status(phase.phase);
            if status != PhaseStatus::Pending {
                self.ui
                    .print_line(format!("      {}", style(format!("currently {}", status)).dim()));
            }
        }

        if options.resume {
            let hours = self.config.toml().defaults.stuck_timeout_hours;
            for stuck in find_stuck_phases(store, hours) {
                self.ui.print_line(format!(
                    "  would recover stuck phase {} ({})",
                    stuck.phase,
                    match stuck.elapsed_hours {
                        Some(hours) => format!("in progress for {:.2} hours", hours),
                        None => "no start time".to_string(),
                    }
                ));
            }
        }

        let verdict = self.plan.next_eligible_phase(store, options.resume);
        self.ui.print_line(format!("  Scheduler: {}", verdict));
    }
}

/// Order in which the scheduler would run the plan from scratch: the lowest
/// numbered phase whose dependencies are already placed comes next.
pub fn execution_order(plan: &PhasePlan) -> Vec<&PhaseConfig> {
    let mut placed = BTreeSet::new();
    let mut order = Vec::with_capacity(plan.len());
    while order.len() < plan.len() {
        let next = plan.order().find(|p| {
            !placed.contains(&p.phase) && p.dependencies.iter().all(|d| placed.contains(d))
        });
        match next {
            Some(phase) => {
                placed.insert(phase.phase);
                order.push(phase);
            }
            None => break,
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::conductor_config::ConductorToml;
    use crate::criteria::{SuccessCriteria, ValidationCheck};
    use crate::recovery::RecoveryReport;
    use chrono::{TimeZone, Utc};
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::{TempDir, tempdir};

    fn clock() -> SharedClock {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap()))
    }

    struct Scripted(Mutex<Vec<bool>>);

    impl PhaseApproval for Scripted {
        fn approve(&self, _phase: &PhaseConfig) -> Result<bool> {
            Ok(self.0.lock().unwrap().pop().unwrap_or(false))
        }
    }

    fn config(dir: &TempDir, auto_checkpoint: bool) -> Config {
        let mut toml = ConductorToml::default();
        toml.defaults.auto_checkpoint = auto_checkpoint;
        Config::with_toml(dir.path().to_path_buf(), toml, false)
    }

    fn plan() -> PhasePlan {
        PhasePlan::new(vec![
            PhaseConfig::new(0, "Discovery").with_timeout(10),
            PhaseConfig::new(1, "Cleaning")
                .with_dependencies(vec![0])
                .with_timeout(10),
            PhaseConfig::new(2, "Report")
                .with_dependencies(vec![1])
                .with_timeout(10),
        ])
        .unwrap()
    }

    fn orchestrator(dir: &TempDir, auto_checkpoint: bool) -> Orchestrator {
        Orchestrator::from_parts(
            config(dir, auto_checkpoint),
            plan(),
            CriteriaFile::default(),
            clock(),
        )
        .with_ui(PipelineUI::hidden(3))
    }

    fn store(dir: &TempDir) -> StateStore {
        StateStore::open(dir.path().join(".conductor/state.json"), clock()).unwrap()
    }

    #[cfg(unix)]
    fn write_executor(dir: &Path, phase: u32, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let executors = dir.join("phase_executors");
        std::fs::create_dir_all(&executors).unwrap();
        let path = executors.join(format!("phase_{}_executor", phase));
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    const WRITES_OUTPUT: &str = r#"while [ "$1" != "--output" ]; do shift; done
echo '{"components_found": 7}' > "$2""#;

    #[tokio::test]
    async fn test_missing_executors_complete_pipeline() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(&dir, false);
        let mut store = store(&dir);

        let summary = orchestrator
            .run(&mut store, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.halt, HaltReason::Complete);
        assert_eq!(summary.exit_code(), exit_codes::SUCCESS);
        assert_eq!(summary.executed.len(), 3);
        assert!(summary.executed.iter().all(|o| o.note.is_some()));
        for phase in 0..3 {
            assert_eq!(store.get_phase_status(phase), PhaseStatus::Completed);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_halts_and_blocks_dependents() {
        let dir = tempdir().unwrap();
        write_executor(dir.path(), 0, WRITES_OUTPUT);
        write_executor(dir.path(), 1, "echo 'bad input' >&2\nexit 3");
        let orchestrator = orchestrator(&dir, false);
        let mut store = store(&dir);

        let summary = orchestrator
            .run(&mut store, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.halt, HaltReason::PhaseFailed(1));
        assert_eq!(summary.exit_code(), exit_codes::PHASE_FAILED);
        assert_eq!(store.get_phase_status(2), PhaseStatus::Pending);
        assert!(store.phase(1).unwrap().errors[0].contains("bad input"));

        let again = orchestrator
            .run(&mut store, &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(
            again.halt,
            HaltReason::Blocked {
                phase: 1,
                reason: BlockReason::Failed
            }
        );
        assert!(again.executed.is_empty());
        assert_eq!(again.exit_code(), exit_codes::PHASE_FAILED);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resume_retries_failed_phase() {
        let dir = tempdir().unwrap();
        write_executor(dir.path(), 0, "exit 1");
        let orchestrator = orchestrator(&dir, false);
        let mut store = store(&dir);
        orchestrator
            .run(&mut store, &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(store.get_phase_status(0), PhaseStatus::Failed);

        write_executor(dir.path(), 0, WRITES_OUTPUT);
        let options = RunOptions {
            resume: true,
            ..Default::default()
        };
        let summary = orchestrator.run(&mut store, &options).await.unwrap();

        assert_eq!(summary.halt, HaltReason::Complete);
        assert_eq!(store.get_phase_status(0), PhaseStatus::Completed);
        assert_eq!(store.phase(0).unwrap().errors.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_recovers_stuck_phase() {
        let dir = tempdir().unwrap();
        let started = Utc.with_ymd_and_hms(2026, 9, 1, 9, 0, 0).unwrap();
        let mut early = StateStore::open(
            dir.path().join(".conductor/state.json"),
            Arc::new(FixedClock(started)),
        )
        .unwrap();
        early.set_phase_status(0, PhaseStatus::InProgress).unwrap();
        drop(early);

        let orchestrator = orchestrator(&dir, false);
        let mut store = store(&dir);

        let blocked = orchestrator
            .run(&mut store, &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(
            blocked.halt,
            HaltReason::Blocked {
                phase: 0,
                reason: BlockReason::InProgress
            }
        );
        assert_eq!(blocked.exit_code(), exit_codes::INCOMPLETE);

        let options = RunOptions {
            resume: true,
            ..Default::default()
        };
        let summary = orchestrator.run(&mut store, &options).await.unwrap();
        assert_eq!(summary.recovered, vec![0]);
        assert_eq!(summary.halt, HaltReason::Complete);
        assert!(store.phase(0).unwrap().errors[0].contains("Stuck phase recovered"));
    }

    #[tokio::test]
    async fn test_dry_run_does_not_mutate() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(&dir, true);
        let mut store = store(&dir);
        let before = store.state().clone();

        let options = RunOptions {
            mode: RunMode::DryRun,
            resume: true,
            ..Default::default()
        };
        let summary = orchestrator.run(&mut store, &options).await.unwrap();

        assert_eq!(summary.halt, HaltReason::DryRun);
        assert_eq!(store.state(), &before);
        assert!(!store.path().exists());
        assert!(!dir.path().join(".conductor/snapshots").exists());
    }

    #[tokio::test]
    async fn test_manual_mode_stops_on_decline() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(&dir, false)
            .with_approval(Box::new(Scripted(Mutex::new(vec![false, true]))));
        let mut store = store(&dir);

        let options = RunOptions {
            mode: RunMode::Manual,
            ..Default::default()
        };
        let summary = orchestrator.run(&mut store, &options).await.unwrap();

        assert_eq!(summary.halt, HaltReason::Declined(1));
        assert_eq!(summary.exit_code(), exit_codes::INCOMPLETE);
        assert_eq!(store.get_phase_status(0), PhaseStatus::Completed);
        assert_eq!(store.get_phase_status(1), PhaseStatus::Pending);
    }

    #[tokio::test]
    async fn test_single_phase_respects_dependencies() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(&dir, false);
        let mut store = store(&dir);

        let options = RunOptions {
            phase: Some(2),
            ..Default::default()
        };
        let summary = orchestrator.run(&mut store, &options).await.unwrap();
        assert_eq!(
            summary.halt,
            HaltReason::Blocked {
                phase: 2,
                reason: BlockReason::WaitingOn(vec![1])
            }
        );
        assert!(store.phase(2).is_none());

        let options = RunOptions {
            phase: Some(0),
            ..Default::default()
        };
        let summary = orchestrator.run(&mut store, &options).await.unwrap();
        assert_eq!(
            summary.halt,
            HaltReason::SinglePhase {
                phase: 0,
                success: true
            }
        );
        assert_eq!(store.get_phase_status(1), PhaseStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_single_phase_is_error() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(&dir, false);
        let mut store = store(&dir);
        let options = RunOptions {
            phase: Some(9),
            ..Default::default()
        };
        assert!(orchestrator.run(&mut store, &options).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_validation_is_recorded_without_changing_status() {
        let dir = tempdir().unwrap();
        write_executor(dir.path(), 0, WRITES_OUTPUT);
        let mut criteria = CriteriaFile::default();
        criteria.insert(
            0,
            SuccessCriteria {
                required_outputs: vec![".conductor/outputs/missing.json".into()],
                validation_checks: vec![ValidationCheck::MetricThreshold {
                    path: ".conductor/outputs/discovery.json".into(),
                    metric: "components_found".to_string(),
                    min: Some(5.0),
                    max: None,
                    exact: None,
                }],
            },
        );
        let orchestrator =
            Orchestrator::from_parts(config(&dir, false), plan(), criteria, clock())
                .with_ui(PipelineUI::hidden(3));
        let mut store = store(&dir);

        let summary = orchestrator
            .run(&mut store, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.halt, HaltReason::Complete);
        let report = &summary.validations[&0];
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(store.get_phase_status(0), PhaseStatus::Completed);
        let recorded = &store.phase(0).unwrap().metadata[VALIDATION_KEY];
        assert_eq!(recorded["valid"], false);
    }

    #[tokio::test]
    async fn test_auto_checkpoint_after_each_phase() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(&dir, true);
        let mut store = store(&dir);

        let summary = orchestrator
            .run(&mut store, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.checkpoints.len(), 3);
        assert_eq!(summary.checkpoints[0], "phase_0_20260901_120000");
        assert_eq!(store.state().checkpoints.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_recovery_requires_force() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(&dir, false);
        let mut store = store(&dir);
        let report = RecoveryReport {
            valid: false,
            errors: vec!["Restored state is missing required 'phases' key".to_string()],
            warnings: Vec::new(),
        };
        store
            .set_value(RECOVERY_KEY, serde_json::to_value(&report).unwrap())
            .unwrap();

        let summary = orchestrator
            .run(&mut store, &RunOptions::default())
            .await
            .unwrap();
        assert!(matches!(summary.halt, HaltReason::RecoveryInvalid(ref e) if e.len() == 1));
        assert_eq!(summary.exit_code(), exit_codes::HARD_FAILURE);
        assert!(store.phase(0).is_none());

        let forced = RunOptions {
            force: true,
            ..Default::default()
        };
        let summary = orchestrator.run(&mut store, &forced).await.unwrap();
        assert_eq!(summary.halt, HaltReason::Complete);
        assert!(store.get_value(RECOVERY_KEY).is_none());
    }

    #[test]
    fn test_execution_order_follows_dependencies() {
        let plan = PhasePlan::new(vec![
            PhaseConfig::new(0, "a").with_dependencies(vec![]),
            PhaseConfig::new(1, "b").with_dependencies(vec![3]),
            PhaseConfig::new(2, "c").with_dependencies(vec![0]),
            PhaseConfig::new(3, "d").with_dependencies(vec![0]),
        ])
        .unwrap();
        let order: Vec<u32> = execution_order(&plan).iter().map(|p| p.phase).collect();
        assert_eq!(order, vec![0, 2, 3, 1]);
    }
}
