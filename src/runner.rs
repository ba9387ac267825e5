//! Phase Runner.
//!
//! Launches one phase's executor as a child process under the Timeout Guard
//! and records the outcome in the State Store. The record moves to
//! `in_progress` before launch and to `completed`/`failed` after, so a crash
//! in between leaves it `in_progress` for stuck-phase recovery to find.
//!
//! Outcomes:
//! - executor absent: soft success, `pending` goes straight to `completed`
//!   with an "executor not found" note
//! - exit 0: `completed`, output path recorded in metadata
//! - non-zero exit, spawn failure or timeout: `failed`, error text appended
//!
//! Phase-local failures are returned as an unsuccessful [`PhaseOutcome`],
//! never as `Err`. `Err` is reserved for state persistence problems and
//! refused launches.

use crate::config::Config;
use crate::errors::{FailureKind, PhaseError};
use crate::notify::{NotificationEvent, NotificationManager, PhaseNotification};
use crate::phase::PhaseConfig;
use crate::state::{FILES_CREATED, PhaseStatus, StateStore};
use crate::timeout::TimeoutGuard;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Note recorded when a phase's executor does not exist.
pub const EXECUTOR_NOT_FOUND: &str = "executor not found";
/// Metadata key for the diagnostic class of the last failure.
pub const LAST_FAILURE_KIND: &str = "last_failure_kind";

/// Result of one phase execution.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase: u32,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub errors: Vec<String>,
    pub note: Option<String>,
    pub output_path: Option<PathBuf>,
    pub failure: Option<FailureKind>,
    pub duration: Duration,
}

impl PhaseOutcome {
    fn new(phase: u32) -> Self {
        Self {
            phase,
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            errors: Vec::new(),
            note: None,
            output_path: None,
            failure: None,
            duration: Duration::ZERO,
        }
    }
}

/// Runs phase executors.
pub struct PhaseRunner {
    project_dir: PathBuf,
    executor_dir: PathBuf,
    output_dir: PathBuf,
    guard: TimeoutGuard,
    notifications: NotificationManager,
}

impl PhaseRunner {
    pub fn new(
        project_dir: impl Into<PathBuf>,
        executor_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project_dir: project_dir.into(),
            executor_dir: executor_dir.into(),
            output_dir: output_dir.into(),
            guard: TimeoutGuard::default(),
            notifications: NotificationManager::empty(),
        }
    }

    /// Build a runner from the runtime configuration, including the
    /// configured timeout backend and notification commands.
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.project_dir, &config.executor_dir, &config.output_dir)
            .with_guard(TimeoutGuard::new(config.toml().defaults.timeout_backend))
            .with_notifications(NotificationManager::from_definitions(
                &config.project_dir,
                &config.toml().notifications,
            ))
    }

    pub fn with_guard(mut self, guard: TimeoutGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_notifications(mut self, notifications: NotificationManager) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn guard(&self) -> &TimeoutGuard {
        &self.guard
    }

    /// Where the executor for `phase` writes its output document.
    pub fn output_path(&self, phase: &PhaseConfig) -> PathBuf {
        self.output_dir.join(format!("{}.json", phase.name_key()))
    }

    /// Resolve the executor program for `phase`.
    ///
    /// An explicit `executor` (relative to the project directory) wins.
    /// Otherwise `<executor_dir>/phase_<N>_executor`, then the first sorted
    /// match of `phase_<N>_executor.*`.
    pub fn resolve_executor(&self, phase: &PhaseConfig) -> Result<PathBuf, PhaseError> {
        if let Some(explicit) = &phase.executor {
            let path = if explicit.is_absolute() {
                explicit.clone()
            } else {
                self.project_dir.join(explicit)
            };
            return if path.is_file() {
                Ok(path)
            } else {
                Err(PhaseError::ExecutorMissing {
                    phase: phase.phase,
                    path,
                })
            };
        }

        let conventional = self
            .executor_dir
            .join(format!("phase_{}_executor", phase.phase));
        if conventional.is_file() {
            return Ok(conventional);
        }

        let pattern = format!(
            "{}/phase_{}_executor.*",
            glob::Pattern::escape(&self.executor_dir.to_string_lossy()),
            phase.phase
        );
        if let Ok(entries) = glob::glob(&pattern) {
            let mut matches: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .filter(|p| p.is_file())
                .collect();
            matches.sort();
            if let Some(first) = matches.into_iter().next() {
                return Ok(first);
            }
        }

        Err(PhaseError::ExecutorMissing {
            phase: phase.phase,
            path: conventional,
        })
    }

    /// Execute one phase and record its outcome.
    pub async fn execute(
        &self,
        store: &mut StateStore,
        phase: &PhaseConfig,
    ) -> Result<PhaseOutcome, PhaseError> {
        let waiting_on: Vec<u32> = phase
            .dependencies
            .iter()
            .copied()
            .filter(|dep| store.get_phase_status(*dep) != PhaseStatus::Completed)
            .collect();
        if !waiting_on.is_empty() {
            return Err(PhaseError::DependenciesNotMet {
                phase: phase.phase,
                waiting_on,
            });
        }

        store.register_phase(phase.phase, &phase.name)?;
        let mut outcome = PhaseOutcome::new(phase.phase);

        let executor = match self.resolve_executor(phase) {
            Ok(path) => path,
            Err(missing) => {
                tracing::warn!(phase = phase.phase, error = %missing, "executor missing, skipping phase");
                store.record_metadata(phase.phase, "note", EXECUTOR_NOT_FOUND)?;
                store.set_phase_status(phase.phase, PhaseStatus::Completed)?;
                self.notify(store, phase, NotificationEvent::PhaseComplete, Some(EXECUTOR_NOT_FOUND))
                    .await;
                outcome.success = true;
                outcome.note = Some(EXECUTOR_NOT_FOUND.to_string());
                outcome.failure = missing.failure_kind();
                return Ok(outcome);
            }
        };

        let output_path = self.output_path(phase);
        if let Err(e) = std::fs::create_dir_all(&self.output_dir) {
            tracing::warn!(dir = %self.output_dir.display(), error = %e, "cannot create output directory");
        }

        store.set_phase_status(phase.phase, PhaseStatus::InProgress)?;
        self.notify(store, phase, NotificationEvent::PhaseStart, None).await;

        let started = Instant::now();
        let mut command = build_command(&executor, phase, &output_path, &self.project_dir);
        tracing::debug!(phase = phase.phase, executor = %executor.display(), output = %output_path.display(), "launching executor");

        let result = match command.spawn() {
            Ok(child) => {
                let limit = Duration::from_secs(phase.timeout_seconds);
                match self.guard.run(limit, child.wait_with_output()).await {
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(source)) => Err(PhaseError::SpawnFailed {
                        path: executor.clone(),
                        source,
                    }),
                    Err(_) => Err(PhaseError::Timeout {
                        phase: phase.phase,
                        seconds: phase.timeout_seconds,
                    }),
                }
            }
            Err(source) => Err(PhaseError::SpawnFailed {
                path: executor.clone(),
                source,
            }),
        };
        outcome.duration = started.elapsed();

        let failure = match result {
            Ok(output) => {
                outcome.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                outcome.stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                if output.status.success() {
                    None
                } else {
                    Some(PhaseError::ExecutorFailed {
                        phase: phase.phase,
                        exit_code: output.status.code().unwrap_or(-1),
                    })
                }
            }
            Err(e) => Some(e),
        };

        match failure {
            None => {
                let output_str = output_path.to_string_lossy().to_string();
                store.record_metadata(phase.phase, "output_file", output_str.clone())?;
                let listed = store
                    .phase(phase.phase)
                    .is_some_and(|r| r.files_created().contains(&output_path));
                if output_path.exists() && !listed {
                    store.append_metadata(phase.phase, FILES_CREATED, output_str)?;
                } else {
                    tracing::warn!(phase = phase.phase, output = %output_path.display(), "executor succeeded without writing its output file");
                }
                store.set_phase_status(phase.phase, PhaseStatus::Completed)?;
                self.notify(store, phase, NotificationEvent::PhaseComplete, None).await;
                outcome.success = true;
                outcome.output_path = Some(output_path);
            }
            Some(error) => {
                let kind = error.failure_kind().unwrap_or(FailureKind::ExecutorFailed);
                let stderr = outcome.stderr.trim();
                let message = if stderr.is_empty() || !matches!(error, PhaseError::ExecutorFailed { .. }) {
                    error.to_string()
                } else {
                    format!("{}: {}", error, stderr)
                };
                tracing::error!(phase = phase.phase, kind = %kind, "{}", message);
                store.add_phase_error(phase.phase, message.clone())?;
                store.record_metadata(phase.phase, LAST_FAILURE_KIND, kind.as_str())?;
                store.set_phase_status(phase.phase, PhaseStatus::Failed)?;
                self.notify(store, phase, NotificationEvent::PhaseError, Some(&message))
                    .await;
                outcome.errors.push(message);
                outcome.failure = Some(kind);
            }
        }

        Ok(outcome)
    }

    async fn notify(
        &self,
        store: &StateStore,
        phase: &PhaseConfig,
        event: NotificationEvent,
        message: Option<&str>,
    ) {
        if self.notifications.is_empty() {
            return;
        }
        let mut notification = PhaseNotification::new(event, phase.phase, &phase.name, store.now());
        if let Some(message) = message {
            notification = notification.with_message(message);
        }
        self.notifications.emit(notification).await;
    }
}

/// `<executor> [args...] --output <path>`, with scripts run through their
/// interpreter when they are not directly executable.
fn build_command(executor: &Path, phase: &PhaseConfig, output: &Path, project_dir: &Path) -> Command {
    let mut command = match interpreter_for(executor) {
        Some(interpreter) => {
            let mut c = Command::new(interpreter);
            c.arg(executor);
            c
        }
        None => Command::new(executor),
    };
    command
        .args(&phase.args)
        .arg("--output")
        .arg(output)
        .current_dir(project_dir)
        .env("CONDUCTOR_PHASE", phase.phase.to_string())
        .env("CONDUCTOR_PHASE_NAME", &phase.name)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

fn interpreter_for(executor: &Path) -> Option<&'static str> {
    if is_executable(executor) {
        return None;
    }
    match executor.extension().and_then(|e| e.to_str()) {
        Some("py") => Some("python3"),
        Some("sh") => Some("sh"),
        Some("js") => Some("node"),
        _ => None,
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("exe") | Some("bat") | Some("cmd")
    )
}
