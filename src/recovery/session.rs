//! Session recovery on top of the Checkpoint Manager.
//!
//! After a crash or manual interruption the operator restores a checkpoint
//! (the most recently recorded one by default) and checks that the restored
//! state is usable before resuming.

use crate::checkpoint::CheckpointManager;
use crate::errors::CheckpointError;
use crate::state::{OrchestrationState, StateStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Key under which the last recovery report is kept in orchestration state.
pub const RECOVERY_KEY: &str = "recovery";

/// Structural and artifact check of a restored state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct SessionRecovery {
    checkpoints: CheckpointManager,
    project_dir: PathBuf,
    restored: Option<(String, Value)>,
}

impl SessionRecovery {
    pub fn new(checkpoints: CheckpointManager, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoints,
            project_dir: project_dir.into(),
            restored: None,
        }
    }

    /// Name of the checkpoint restored by the last successful recovery.
    pub fn restored_checkpoint(&self) -> Option<&str> {
        self.restored.as_ref().map(|(name, _)| name.as_str())
    }

    /// Restore `name`, or the most recently recorded checkpoint (falling
    /// back to the newest snapshot on disk). Returns `false` without
    /// mutating anything when there is nothing to restore.
    pub fn recover_from_checkpoint(
        &mut self,
        store: &mut StateStore,
        name: Option<&str>,
    ) -> Result<bool, CheckpointError> {
        let target = match name {
            Some(name) => name.to_string(),
            None => match store.state().latest_checkpoint() {
                Some(reference) => reference.name.clone(),
                None => match self.checkpoints.list_snapshots()?.into_iter().next() {
                    Some(newest) => newest.name,
                    None => {
                        tracing::warn!("no checkpoints recorded, nothing to recover");
                        return Ok(false);
                    }
                },
            },
        };

        match self.checkpoints.restore_snapshot(store, &target)? {
            Some(doc) => {
                tracing::info!(checkpoint = %target, "session recovered from checkpoint");
                self.restored = Some((target, doc));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Check the restored state. A missing `phases` key is an error; missing
    /// task tracking and missing `files_created` artifacts are warnings.
    pub fn validate_recovery(&self, store: &StateStore) -> RecoveryReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let doc = match &self.restored {
            Some((_, doc)) => doc.clone(),
            None => store.state().to_document().unwrap_or(Value::Null),
        };
        match doc.as_object() {
            Some(object) => {
                if !object.contains_key("phases") {
                    errors.push("Restored state is missing required 'phases' key".to_string());
                }
                if !object.contains_key("tasks") {
                    warnings.push("Restored state has no task tracking ('tasks')".to_string());
                }
            }
            None => errors.push("Restored state is not a structured document".to_string()),
        }

        for record in store.state().phases.values() {
            for file in record.files_created() {
                let path = if file.is_absolute() {
                    file.clone()
                } else {
                    self.project_dir.join(&file)
                };
                if !path.exists() {
                    warnings.push(format!(
                        "Phase {} artifact no longer exists: {}",
                        record.phase,
                        file.display()
                    ));
                }
            }
        }

        RecoveryReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Persist `report` so that a later `run` can refuse to resume from an
    /// invalid restore.
    pub fn record_report(
        &self,
        store: &mut StateStore,
        report: &RecoveryReport,
    ) -> Result<(), CheckpointError> {
        let value = serde_json::json!({
            "checkpoint": self.restored_checkpoint(),
            "recovered_at": store.now(),
            "valid": report.valid,
            "errors": report.errors,
            "warnings": report.warnings,
        });
        store.set_value(RECOVERY_KEY, value)?;
        Ok(())
    }
}

/// Errors from the last recorded recovery, if it was invalid.
pub fn blocking_recovery_errors(state: &OrchestrationState) -> Option<Vec<String>> {
    let report = state.values.get(RECOVERY_KEY)?;
    if report.get("valid").and_then(Value::as_bool) != Some(false) {
        return None;
    }
    let errors = report
        .get("errors")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    Some(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FixedClock, SharedClock};
    use crate::state::{FILES_CREATED, PhaseStatus};
    use chrono::{TimeZone, Utc};
    use sha2::{Digest, Sha256};
    use std::fs;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    fn clock() -> SharedClock {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap()))
    }

    fn setup() -> (StateStore, SessionRecovery, TempDir) {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().join(".conductor/state.json"), clock()).unwrap();
        let manager = CheckpointManager::new(dir.path().join(".conductor/snapshots"), clock());
        let recovery = SessionRecovery::new(manager, dir.path());
        (store, recovery, dir)
    }

    fn manager(dir: &TempDir) -> CheckpointManager {
        CheckpointManager::new(dir.path().join(".conductor/snapshots"), clock())
    }

    #[test]
    fn test_no_checkpoints_fails_cleanly() {
        let (mut store, mut recovery, _dir) = setup();
        let before = store.state().clone();
        assert!(!recovery.recover_from_checkpoint(&mut store, None).unwrap());
        assert_eq!(store.state(), &before);
        assert!(recovery.restored_checkpoint().is_none());
    }

    #[test]
    fn test_missing_named_checkpoint_fails_cleanly() {
        let (mut store, mut recovery, _dir) = setup();
        assert!(!recovery
            .recover_from_checkpoint(&mut store, Some("gone"))
            .unwrap());
    }

    #[test]
    fn test_recovers_latest_reference() {
        let (mut store, mut recovery, dir) = setup();
        store.set_phase_status(0, PhaseStatus::Completed).unwrap();
        let name = manager(&dir).create_snapshot(&mut store, Some("cp1")).unwrap();
        store.set_phase_status(1, PhaseStatus::InProgress).unwrap();

        assert!(recovery.recover_from_checkpoint(&mut store, None).unwrap());
        assert_eq!(recovery.restored_checkpoint(), Some(name.as_str()));
        assert!(store.phase(1).is_none());

        let report = recovery.validate_recovery(&store);
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_falls_back_to_newest_snapshot_when_state_lost() {
        let (mut store, mut recovery, dir) = setup();
        store.set_phase_status(0, PhaseStatus::Completed).unwrap();
        manager(&dir).create_snapshot(&mut store, Some("cp1")).unwrap();
        store.replace_state(OrchestrationState::default()).unwrap();

        assert!(recovery.recover_from_checkpoint(&mut store, None).unwrap());
        assert_eq!(store.get_phase_status(0), PhaseStatus::Completed);
    }

    #[test]
    fn test_missing_artifacts_are_warnings() {
        let (mut store, mut recovery, dir) = setup();
        let kept = dir.path().join("kept.json");
        fs::write(&kept, "{}").unwrap();
        store.append_metadata(0, FILES_CREATED, kept.to_string_lossy().to_string()).unwrap();
        store.append_metadata(0, FILES_CREATED, "outputs/cleaned.json").unwrap();
        manager(&dir).create_snapshot(&mut store, Some("cp")).unwrap();

        recovery.recover_from_checkpoint(&mut store, Some("cp")).unwrap();
        let report = recovery.validate_recovery(&store);

        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("cleaned.json"));
    }

    #[test]
    fn test_snapshot_without_phases_is_invalid() {
        let (mut store, mut recovery, dir) = setup();
        let snapshots = dir.path().join(".conductor/snapshots");
        fs::create_dir_all(&snapshots).unwrap();
        let state = serde_json::json!({"checkpoints": []});
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_string(&state).unwrap().as_bytes());
        let file = serde_json::json!({
            "name": "legacy",
            "timestamp": "2026-08-01T07:00:00Z",
            "checksum": format!("{:x}", hasher.finalize()),
            "state": state,
        });
        fs::write(snapshots.join("legacy.json"), file.to_string()).unwrap();

        assert!(recovery
            .recover_from_checkpoint(&mut store, Some("legacy"))
            .unwrap());
        let report = recovery.validate_recovery(&store);
        assert!(!report.valid);
        assert!(report.errors[0].contains("phases"));
        assert!(report.warnings.iter().any(|w| w.contains("tasks")));

        recovery.record_report(&mut store, &report).unwrap();
        let blocking = blocking_recovery_errors(store.state()).unwrap();
        assert_eq!(blocking, report.errors);
    }

    #[test]
    fn test_valid_report_does_not_block() {
        let (mut store, recovery, _dir) = setup();
        let report = RecoveryReport {
            valid: true,
            errors: Vec::new(),
            warnings: vec!["w".into()],
        };
        recovery.record_report(&mut store, &report).unwrap();
        assert!(blocking_recovery_errors(store.state()).is_none());
    }
}
