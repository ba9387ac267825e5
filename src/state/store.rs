use crate::clock::SharedClock;
use crate::errors::StateError;
use crate::state::record::{CheckpointRef, OrchestrationState, PhaseRecord, PhaseStatus};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Durable owner of the orchestration state.
///
/// Every mutating call rewrites the whole state file before returning, via a
/// temporary file and an atomic rename, so a crash right after any call
/// leaves durable state no older than that call. Callers serialize access
/// through `&mut self`; cross-process exclusion is the job of `StateLock`.
pub struct StateStore {
    path: PathBuf,
    state: OrchestrationState,
    clock: SharedClock,
}

impl StateStore {
    /// Open the store at `path`, loading whatever is on disk.
    pub fn open(path: impl Into<PathBuf>, clock: SharedClock) -> Result<Self, StateError> {
        let mut store = Self {
            path: path.into(),
            state: OrchestrationState::default(),
            clock,
        };
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    pub fn state(&self) -> &OrchestrationState {
        &self.state
    }

    /// Reload from disk. A missing file yields an empty state.
    pub fn load(&mut self) -> Result<(), StateError> {
        self.state = read_state_file(&self.path)?;
        tracing::debug!(path = %self.path.display(), phases = self.state.phases.len(), "state loaded");
        Ok(())
    }

    /// Flush the in-memory state to disk.
    pub fn save(&self) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(&self.state).map_err(StateError::Serialize)?;
        write_atomically(&self.path, json.as_bytes())
    }

    pub fn phase(&self, phase: u32) -> Option<&PhaseRecord> {
        self.state.phases.get(&phase)
    }

    /// Status of a phase; phases never touched are implicitly pending.
    pub fn get_phase_status(&self, phase: u32) -> PhaseStatus {
        self.phase(phase).map(|r| r.status).unwrap_or_default()
    }

    /// Record the human label of a phase.
    pub fn register_phase(&mut self, phase: u32, name: &str) -> Result<(), StateError> {
        let record = self.record_mut(phase);
        if record.name == name {
            return Ok(());
        }
        record.name = name.to_string();
        self.save()
    }

    pub fn set_phase_status(&mut self, phase: u32, status: PhaseStatus) -> Result<(), StateError> {
        let now = self.clock.now();
        let record = self.record_mut(phase);
        let previous = record.status;
        record.status = status;
        match status {
            PhaseStatus::InProgress => {
                record.started_at = Some(now);
                record.completed_at = None;
            }
            PhaseStatus::Completed | PhaseStatus::Failed => {
                let floor = record.started_at.map_or(now, |s| s.max(now));
                record.completed_at = Some(floor);
            }
            PhaseStatus::Pending => {
                record.completed_at = None;
            }
        }
        tracing::info!(phase, from = %previous, to = %status, "phase status changed");
        self.save()
    }

    pub fn add_phase_error(&mut self, phase: u32, message: impl Into<String>) -> Result<(), StateError> {
        let message = message.into();
        tracing::debug!(phase, %message, "phase error recorded");
        self.record_mut(phase).errors.push(message);
        self.save()
    }

    pub fn record_metadata(
        &mut self,
        phase: u32,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), StateError> {
        self.record_mut(phase)
            .metadata
            .insert(key.to_string(), value.into());
        self.save()
    }

    /// Append to a list-valued metadata entry, creating it if absent. A
    /// scalar already stored under `key` becomes the first list element.
    pub fn append_metadata(
        &mut self,
        phase: u32,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), StateError> {
        let record = self.record_mut(phase);
        append_to(record.metadata.entry(key.to_string()).or_insert(Value::Null), value.into());
        self.save()
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.state.values.get(key)
    }

    pub fn set_value(&mut self, key: &str, value: impl Into<Value>) -> Result<(), StateError> {
        self.state.values.insert(key.to_string(), value.into());
        self.save()
    }

    pub fn append_value(&mut self, key: &str, value: impl Into<Value>) -> Result<(), StateError> {
        append_to(
            self.state.values.entry(key.to_string()).or_insert(Value::Null),
            value.into(),
        );
        self.save()
    }

    pub fn remove_value(&mut self, key: &str) -> Result<(), StateError> {
        if self.state.values.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }

    pub fn add_checkpoint_ref(&mut self, checkpoint: CheckpointRef) -> Result<(), StateError> {
        self.state.checkpoints.push(checkpoint);
        self.save()
    }

    /// Replace the whole live state (checkpoint restore) and persist it.
    pub fn replace_state(&mut self, state: OrchestrationState) -> Result<(), StateError> {
        self.state = state;
        self.save()
    }

    fn record_mut(&mut self, phase: u32) -> &mut PhaseRecord {
        self.state
            .phases
            .entry(phase)
            .or_insert_with(|| PhaseRecord::new(phase))
    }
}

fn append_to(slot: &mut Value, value: Value) {
    match &mut *slot {
        Value::Array(items) => items.push(value),
        Value::Null => *slot = Value::Array(vec![value]),
        _ => {
            let first = slot.take();
            *slot = Value::Array(vec![first, value]);
        }
    }
}

/// Read and structurally check a state document.
pub fn read_state_file(path: &Path) -> Result<OrchestrationState, StateError> {
    if !path.exists() {
        return Ok(OrchestrationState::default());
    }
    let content = fs::read_to_string(path).map_err(|source| StateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(OrchestrationState::default());
    }

    let corrupt = |reason: String| StateError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    let doc: Value = serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
    let object = doc
        .as_object()
        .ok_or_else(|| corrupt("top-level value is not an object".to_string()))?;
    if !object.is_empty() && !object.contains_key("phases") {
        return Err(corrupt("missing required 'phases' key".to_string()));
    }
    OrchestrationState::from_document(&doc).map_err(|e| corrupt(e.to_string()))
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
    let io_err = |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp, path).map_err(io_err)
}
