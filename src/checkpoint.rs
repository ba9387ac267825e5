//! Checkpoint/Snapshot Manager.
//!
//! Each snapshot is one JSON file under `.conductor/snapshots/`, written once
//! with create-new semantics and never touched again. The file carries a
//! SHA-256 digest of its serialized state so a damaged file is rejected
//! instead of restored.

use crate::clock::SharedClock;
use crate::errors::CheckpointError;
use crate::state::{CheckpointRef, OrchestrationState, StateStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// On-disk snapshot document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub checksum: String,
    pub state: Value,
}

impl SnapshotFile {
    fn verify(&self) -> bool {
        state_checksum(&self.state).is_ok_and(|sum| sum == self.checksum)
    }
}

/// Listing entry for a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
}

pub struct CheckpointManager {
    dir: PathBuf,
    clock: SharedClock,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, clock: SharedClock) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Snapshot the full live state. Without a name, one is generated from
    /// the current time. Returns the snapshot name.
    pub fn create_snapshot(
        &self,
        store: &mut StateStore,
        name: Option<&str>,
    ) -> Result<String, CheckpointError> {
        let now = self.clock.now();
        match name {
            Some(name) => self.write_snapshot(store, name, now, false),
            None => {
                let generated = format!("snapshot_{}", now.format("%Y%m%d_%H%M%S"));
                self.write_snapshot(store, &generated, now, true)
            }
        }
    }

    /// Checkpoint taken after `phase` completes.
    pub fn auto_checkpoint(
        &self,
        store: &mut StateStore,
        phase: u32,
    ) -> Result<String, CheckpointError> {
        let now = self.clock.now();
        let name = format!("phase_{}_{}", phase, now.format("%Y%m%d_%H%M%S"));
        self.write_snapshot(store, &name, now, true)
    }

    fn write_snapshot(
        &self,
        store: &mut StateStore,
        name: &str,
        now: DateTime<Utc>,
        generated: bool,
    ) -> Result<String, CheckpointError> {
        validate_name(name)?;
        fs::create_dir_all(&self.dir).map_err(|source| CheckpointError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut name = name.to_string();
        if self.snapshot_path(&name).exists() {
            if !generated {
                return Err(CheckpointError::AlreadyExists(name));
            }
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            name = format!("{}_{}", name, &suffix[..8]);
        }
        let path = self.snapshot_path(&name);

        let reference = CheckpointRef {
            name: name.clone(),
            timestamp: now,
            path: path.clone(),
        };
        let mut state = store.state().clone();
        state.checkpoints.push(reference.clone());
        let doc = state.to_document().map_err(CheckpointError::Serialize)?;
        let file = SnapshotFile {
            name: name.clone(),
            timestamp: now,
            checksum: state_checksum(&doc).map_err(CheckpointError::Serialize)?,
            state: doc,
        };
        let json = serde_json::to_string_pretty(&file).map_err(CheckpointError::Serialize)?;

        let io_err = |source| CheckpointError::Io {
            path: path.clone(),
            source,
        };
        let mut out = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => CheckpointError::AlreadyExists(name.clone()),
                _ => io_err(e),
            })?;
        out.write_all(json.as_bytes()).map_err(io_err)?;
        out.sync_all().map_err(io_err)?;

        store.add_checkpoint_ref(reference)?;
        tracing::info!(snapshot = %name, path = %path.display(), "snapshot created");
        Ok(name)
    }

    /// Read and integrity-check a snapshot. `Ok(None)` if it does not exist.
    pub fn read_snapshot(&self, name: &str) -> Result<Option<SnapshotFile>, CheckpointError> {
        validate_name(name)?;
        let path = self.snapshot_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|source| CheckpointError::Io {
            path: path.clone(),
            source,
        })?;
        let file: SnapshotFile =
            serde_json::from_str(&content).map_err(CheckpointError::Serialize)?;
        if !file.verify() {
            return Err(CheckpointError::IntegrityMismatch {
                name: name.to_string(),
            });
        }
        Ok(Some(file))
    }

    /// Replace the live state with the snapshot's and persist it. Returns
    /// the raw restored document, or `None` (nothing mutated) if the snapshot
    /// does not exist.
    pub fn restore_snapshot(
        &self,
        store: &mut StateStore,
        name: &str,
    ) -> Result<Option<Value>, CheckpointError> {
        let Some(file) = self.read_snapshot(name)? else {
            tracing::warn!(snapshot = %name, "snapshot not found");
            return Ok(None);
        };
        let mut restored =
            OrchestrationState::from_document(&file.state).map_err(CheckpointError::Serialize)?;

        // Checkpoints taken after this snapshot stay reachable.
        for reference in &store.state().checkpoints {
            if reference.timestamp > file.timestamp
                && !restored.checkpoints.iter().any(|c| c.name == reference.name)
            {
                restored.checkpoints.push(reference.clone());
            }
        }
        restored.checkpoints.sort_by_key(|c| c.timestamp);

        store.replace_state(restored)?;
        tracing::info!(snapshot = %name, "snapshot restored");
        Ok(Some(file.state))
    }

    /// Restore a snapshot; `false` (nothing mutated) if it does not exist.
    pub fn load_snapshot(&self, store: &mut StateStore, name: &str) -> Result<bool, CheckpointError> {
        Ok(self.restore_snapshot(store, name)?.is_some())
    }

    /// Every readable snapshot, newest first.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>, CheckpointError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|source| CheckpointError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut snapshots = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str::<SnapshotFile>(&c).ok());
            match parsed {
                Some(file) => snapshots.push(SnapshotInfo {
                    name: file.name,
                    timestamp: file.timestamp,
                    path,
                }),
                None => tracing::warn!(path = %path.display(), "skipping unreadable snapshot"),
            }
        }
        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.name.cmp(&a.name)));
        Ok(snapshots)
    }
}

fn state_checksum(state: &Value) -> Result<String, serde_json::Error> {
    let serialized = serde_json::to_string(state)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

fn validate_name(name: &str) -> Result<(), CheckpointError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::state::PhaseStatus;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    fn clock_at(hour: u32) -> SharedClock {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 7, 1, hour, 0, 0).unwrap()))
    }

    fn setup() -> (StateStore, CheckpointManager, TempDir) {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.json"), clock_at(9)).unwrap();
        let manager = CheckpointManager::new(dir.path().join("snapshots"), clock_at(9));
        (store, manager, dir)
    }

    #[test]
    fn test_round_trip_restores_identical_state() {
        let (mut store, manager, _dir) = setup();
        store.set_phase_status(0, PhaseStatus::Completed).unwrap();
        store.set_value("mode", "automated").unwrap();

        let name = manager.create_snapshot(&mut store, None).unwrap();
        let at_snapshot = store.state().clone();

        store.set_phase_status(1, PhaseStatus::Failed).unwrap();
        store.add_phase_error(1, "boom").unwrap();

        assert!(manager.load_snapshot(&mut store, &name).unwrap());
        assert_eq!(store.state(), &at_snapshot);
        store.load().unwrap();
        assert_eq!(store.state(), &at_snapshot);
    }

    #[test]
    fn test_generated_name_and_reference() {
        let (mut store, manager, _dir) = setup();
        let name = manager.create_snapshot(&mut store, None).unwrap();
        assert_eq!(name, "snapshot_20260701_090000");
        let reference = store.state().latest_checkpoint().unwrap();
        assert_eq!(reference.name, name);
        assert!(reference.path.exists());
    }

    #[test]
    fn test_generated_name_collision_gets_suffix() {
        let (mut store, manager, _dir) = setup();
        let first = manager.create_snapshot(&mut store, None).unwrap();
        let second = manager.create_snapshot(&mut store, None).unwrap();
        assert_ne!(first, second);
        assert!(second.starts_with(&first));
    }

    #[test]
    fn test_explicit_name_collision_is_error() {
        let (mut store, manager, _dir) = setup();
        manager.create_snapshot(&mut store, Some("before-audit")).unwrap();
        let err = manager
            .create_snapshot(&mut store, Some("before-audit"))
            .unwrap_err();
        assert!(matches!(err, CheckpointError::AlreadyExists(_)));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let (mut store, manager, _dir) = setup();
        for bad in ["", "../escape", ".hidden", "a/b", "sp ace"] {
            assert!(matches!(
                manager.create_snapshot(&mut store, Some(bad)),
                Err(CheckpointError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn test_missing_snapshot_returns_false_without_mutation() {
        let (mut store, manager, _dir) = setup();
        store.set_phase_status(0, PhaseStatus::Completed).unwrap();
        let before = store.state().clone();
        assert!(!manager.load_snapshot(&mut store, "nope").unwrap());
        assert_eq!(store.state(), &before);
    }

    #[test]
    fn test_tampered_snapshot_rejected() {
        let (mut store, manager, _dir) = setup();
        store.set_phase_status(0, PhaseStatus::Failed).unwrap();
        let name = manager.create_snapshot(&mut store, Some("cp")).unwrap();

        let path = manager.snapshot_path(&name);
        let tampered = fs::read_to_string(&path)
            .unwrap()
            .replace("\"failed\"", "\"completed\"");
        fs::write(&path, tampered).unwrap();

        let before = store.state().clone();
        let err = manager.load_snapshot(&mut store, &name).unwrap_err();
        assert!(matches!(err, CheckpointError::IntegrityMismatch { .. }));
        assert_eq!(store.state(), &before);
    }

    #[test]
    fn test_restore_keeps_newer_checkpoint_references() {
        let dir = tempdir().unwrap();
        let mut store = StateStore::open(dir.path().join("state.json"), clock_at(9)).unwrap();
        let early = CheckpointManager::new(dir.path().join("snapshots"), clock_at(9));
        let late = CheckpointManager::new(dir.path().join("snapshots"), clock_at(11));

        let first = early.create_snapshot(&mut store, Some("first")).unwrap();
        let second = late.create_snapshot(&mut store, Some("second")).unwrap();

        early.load_snapshot(&mut store, &first).unwrap();
        let names: Vec<&str> = store
            .state()
            .checkpoints
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["first", second.as_str()]);
    }

    #[test]
    fn test_list_snapshots_newest_first() {
        let dir = tempdir().unwrap();
        let mut store = StateStore::open(dir.path().join("state.json"), clock_at(9)).unwrap();
        for (hour, name) in [(10, "b"), (8, "a"), (12, "c")] {
            CheckpointManager::new(dir.path().join("snapshots"), clock_at(hour))
                .create_snapshot(&mut store, Some(name))
                .unwrap();
        }
        fs::write(dir.path().join("snapshots/garbage.json"), "not json").unwrap();

        let manager = CheckpointManager::new(dir.path().join("snapshots"), clock_at(9));
        let names: Vec<String> = manager
            .list_snapshots()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_list_without_directory_is_empty() {
        let (_store, manager, _dir) = setup();
        assert!(manager.list_snapshots().unwrap().is_empty());
    }

    #[test]
    fn test_auto_checkpoint_name() {
        let (mut store, manager, _dir) = setup();
        let name = manager.auto_checkpoint(&mut store, 4).unwrap();
        assert_eq!(name, "phase_4_20260701_090000");
        assert!(manager.snapshot_path(&name).exists());
    }
}
