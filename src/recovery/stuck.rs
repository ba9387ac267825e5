//! Stuck-phase detection and recovery.
//!
//! A phase left `in_progress` longer than the threshold almost always means
//! the orchestrator died mid-phase. Recovery force-fails such phases so the
//! scheduler's retry path can pick them up again. This runs as a discrete
//! pass between orchestrator runs, never alongside a Phase Runner on the same
//! store.

use crate::errors::{FailureKind, StateError};
use crate::runner::LAST_FAILURE_KIND;
use crate::state::{PhaseStatus, StateStore};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_STUCK_TIMEOUT_HOURS: f64 = 2.0;

/// A phase found in progress past the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StuckPhase {
    pub phase: u32,
    pub name: String,
    /// `None` for a malformed record with no start time
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_hours: Option<f64>,
}

/// Every `in_progress` phase whose elapsed time exceeds `timeout_hours`.
/// Records without a start time are always reported.
pub fn find_stuck_phases(store: &StateStore, timeout_hours: f64) -> Vec<StuckPhase> {
    let now = store.now();
    store
        .state()
        .phases
        .values()
        .filter(|record| record.status == PhaseStatus::InProgress)
        .filter_map(|record| {
            let elapsed_hours = record
                .elapsed_since_start(now)
                .map(|d| d.num_milliseconds() as f64 / 3_600_000.0);
            let stuck = match elapsed_hours {
                Some(hours) => hours > timeout_hours,
                None => true,
            };
            stuck.then(|| StuckPhase {
                phase: record.phase,
                name: record.name.clone(),
                started_at: record.started_at,
                elapsed_hours,
            })
        })
        .collect()
}

/// Force-fail every stuck phase and return their numbers. With `dry_run`
/// nothing is mutated.
pub fn recover_stuck_phases(
    store: &mut StateStore,
    timeout_hours: f64,
    dry_run: bool,
) -> Result<Vec<u32>, StateError> {
    let stuck = find_stuck_phases(store, timeout_hours);
    let phases: Vec<u32> = stuck.iter().map(|s| s.phase).collect();
    if dry_run {
        tracing::info!(count = phases.len(), "dry run: stuck phases left untouched");
        return Ok(phases);
    }

    for entry in &stuck {
        let recovered_at = store.now();
        let message = match entry.elapsed_hours {
            Some(hours) => format!(
                "Stuck phase recovered: in progress for {:.2} hours (threshold {} hours); marked failed at {}",
                hours,
                timeout_hours,
                recovered_at.to_rfc3339()
            ),
            None => format!(
                "Stuck phase recovered: in progress with no recorded start time; marked failed at {}",
                recovered_at.to_rfc3339()
            ),
        };
        tracing::warn!(phase = entry.phase, elapsed_hours = ?entry.elapsed_hours, "recovering stuck phase");
        store.add_phase_error(entry.phase, message)?;
        store.record_metadata(entry.phase, LAST_FAILURE_KIND, FailureKind::StuckPhase.as_str())?;
        store.set_phase_status(entry.phase, PhaseStatus::Failed)?;
    }

    Ok(phases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FixedClock, SharedClock};
    use crate::state::OrchestrationState;
    use crate::state::PhaseRecord;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn store_with(records: Vec<PhaseRecord>) -> (StateStore, TempDir) {
        let dir = tempdir().unwrap();
        let clock: SharedClock = Arc::new(FixedClock(now()));
        let mut store = StateStore::open(dir.path().join("state.json"), clock).unwrap();
        let mut state = OrchestrationState::default();
        for record in records {
            state.phases.insert(record.phase, record);
        }
        store.replace_state(state).unwrap();
        (store, dir)
    }

    fn in_progress(phase: u32, started_hours_ago: Option<i64>) -> PhaseRecord {
        let mut record = PhaseRecord::new(phase);
        record.status = PhaseStatus::InProgress;
        record.started_at = started_hours_ago.map(|h| now() - Duration::hours(h));
        record
    }

    #[test]
    fn test_threshold_scenario() {
        let (store, _dir) = store_with(vec![in_progress(3, Some(3))]);

        let stuck = find_stuck_phases(&store, 2.0);
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].phase, 3);
        assert!((stuck[0].elapsed_hours.unwrap() - 3.0).abs() < 1e-9);

        assert!(find_stuck_phases(&store, 4.0).is_empty());
    }

    #[test]
    fn test_only_in_progress_phases_considered() {
        let mut completed = PhaseRecord::new(1);
        completed.status = PhaseStatus::Completed;
        completed.started_at = Some(now() - Duration::hours(10));
        let (store, _dir) = store_with(vec![completed, in_progress(2, Some(1))]);
        assert!(find_stuck_phases(&store, 2.0).is_empty());
    }

    #[test]
    fn test_missing_start_time_is_always_stuck() {
        let (store, _dir) = store_with(vec![in_progress(5, None)]);
        let stuck = find_stuck_phases(&store, 1000.0);
        assert_eq!(stuck.len(), 1);
        assert!(stuck[0].started_at.is_none());
        assert!(stuck[0].elapsed_hours.is_none());
    }

    #[test]
    fn test_find_is_idempotent() {
        let (store, _dir) = store_with(vec![in_progress(1, Some(5)), in_progress(4, None)]);
        assert_eq!(find_stuck_phases(&store, 2.0), find_stuck_phases(&store, 2.0));
    }

    #[test]
    fn test_dry_run_never_mutates() {
        let (mut store, _dir) = store_with(vec![in_progress(3, Some(3)), in_progress(4, None)]);
        let before = store.state().clone();
        let on_disk_before = std::fs::read_to_string(store.path()).unwrap();

        let phases = recover_stuck_phases(&mut store, 2.0, true).unwrap();

        assert_eq!(phases, vec![3, 4]);
        assert_eq!(store.state(), &before);
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), on_disk_before);
    }

    #[test]
    fn test_recovery_fails_phase_with_diagnostic() {
        let (mut store, _dir) = store_with(vec![in_progress(3, Some(3)), in_progress(6, Some(1))]);

        let phases = recover_stuck_phases(&mut store, 2.0, false).unwrap();

        assert_eq!(phases, vec![3]);
        let record = store.phase(3).unwrap();
        assert_eq!(record.status, PhaseStatus::Failed);
        assert!(record.completed_at.unwrap() >= record.started_at.unwrap());
        assert!(record.errors[0].contains("3.00 hours"));
        assert!(record.errors[0].contains(&now().to_rfc3339()));
        assert_eq!(record.metadata[LAST_FAILURE_KIND], "stuck_phase");
        assert_eq!(store.get_phase_status(6), PhaseStatus::InProgress);
        assert!(find_stuck_phases(&store, 2.0).is_empty());
    }
}
