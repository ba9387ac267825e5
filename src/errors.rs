//! Typed error hierarchy for the conductor engine.
//!
//! One enum per subsystem:
//! - `StateError`: State Store persistence and locking
//! - `PlanError`: phase configuration loading and validation
//! - `PhaseError`: a single phase execution
//! - `CheckpointError`: snapshot creation and restore
//!
//! `FailureKind` names the diagnostic class of a failure so that it can be
//! recorded next to a phase and reported without conflating timeouts,
//! executor exits and recovery-forced failures.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from the State Store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to access state file at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Failed to serialize orchestration state: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("State lock {path} is held by another orchestrator")]
    LockHeld { path: PathBuf },
}

/// Errors from loading or validating the phase configuration.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to read phase configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse phase configuration {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Phase {0} is declared more than once")]
    DuplicatePhase(u32),

    #[error("Phase {phase} depends on unknown phase {dependency}")]
    UnknownDependency { phase: u32, dependency: u32 },

    #[error("Dependency cycle detected: {}", format_cycle(.0))]
    DependencyCycle(Vec<u32>),
}

fn format_cycle(cycle: &[u32]) -> String {
    cycle
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors from a single phase execution.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Executor for phase {phase} not found at {path}")]
    ExecutorMissing { phase: u32, path: PathBuf },

    #[error("Executor for phase {phase} exited with code {exit_code}")]
    ExecutorFailed { phase: u32, exit_code: i32 },

    #[error("Phase {phase} timed out after {seconds} seconds")]
    Timeout { phase: u32, seconds: u64 },

    #[error("Failed to spawn executor {path}: {source}")]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Phase {phase} is waiting on incomplete dependencies {waiting_on:?}")]
    DependenciesNotMet { phase: u32, waiting_on: Vec<u32> },

    #[error("Phase {0} is not declared in the phase configuration")]
    UnknownPhase(u32),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors from the Checkpoint/Snapshot Manager.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Snapshot '{0}' not found")]
    NotFound(String),

    #[error("Snapshot '{0}' already exists")]
    AlreadyExists(String),

    #[error("Snapshot '{name}' failed its integrity check")]
    IntegrityMismatch { name: String },

    #[error("Invalid snapshot name '{0}'")]
    InvalidName(String),

    #[error("Failed to access snapshot file at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize snapshot: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Raised by the Timeout Guard when a body outlives its deadline.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("deadline of {0:?} exceeded")]
pub struct DeadlineExceeded(pub Duration);

/// Diagnostic classes of phase-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ExecutorMissing,
    ExecutorFailed,
    PhaseTimeout,
    ValidationFailed,
    StuckPhase,
    CheckpointNotFound,
    SnapshotNotFound,
    StateCorrupt,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ExecutorMissing => "executor_missing",
            FailureKind::ExecutorFailed => "executor_failed",
            FailureKind::PhaseTimeout => "phase_timeout",
            FailureKind::ValidationFailed => "validation_failed",
            FailureKind::StuckPhase => "stuck_phase",
            FailureKind::CheckpointNotFound => "checkpoint_not_found",
            FailureKind::SnapshotNotFound => "snapshot_not_found",
            FailureKind::StateCorrupt => "state_corrupt",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl PhaseError {
    /// The diagnostic class this error is reported under, if it is a
    /// phase-local failure.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            PhaseError::ExecutorMissing { .. } => Some(FailureKind::ExecutorMissing),
            PhaseError::ExecutorFailed { .. } | PhaseError::SpawnFailed { .. } => {
                Some(FailureKind::ExecutorFailed)
            }
            PhaseError::Timeout { .. } => Some(FailureKind::PhaseTimeout),
            PhaseError::State(StateError::Corrupt { .. }) => Some(FailureKind::StateCorrupt),
            _ => None,
        }
    }
}
