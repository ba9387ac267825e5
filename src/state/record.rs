use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Metadata key holding the list of artifact paths a phase produced.
pub const FILES_CREATED: &str = "files_created";

/// Lifecycle status of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PhaseStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(PhaseStatus::Pending),
            "in_progress" => Ok(PhaseStatus::InProgress),
            "completed" => Ok(PhaseStatus::Completed),
            "failed" => Ok(PhaseStatus::Failed),
            _ => anyhow::bail!(
                "Invalid phase status '{}'. Valid values: pending, in_progress, completed, failed",
                s
            ),
        }
    }
}

/// Durable record of one phase. Never deleted, only superseded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Append-only diagnostic trail.
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl PhaseRecord {
    pub fn new(phase: u32) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(FILES_CREATED.to_string(), Value::Array(Vec::new()));
        Self {
            phase,
            name: String::new(),
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
            errors: Vec::new(),
            metadata,
        }
    }

    /// Paths listed under `files_created`, ignoring non-string entries.
    pub fn files_created(&self) -> Vec<PathBuf> {
        match self.metadata.get(FILES_CREATED) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(PathBuf::from)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Time spent in progress as of `now`, if the record has a start time.
    pub fn elapsed_since_start(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at.map(|started| now - started)
    }
}

/// Reference to a checkpoint file, kept in the live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
}

/// The aggregate root persisted by the State Store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    #[serde(default)]
    pub phases: BTreeMap<u32, PhaseRecord>,
    #[serde(default)]
    pub checkpoints: Vec<CheckpointRef>,
    /// Task-tracking substructures owned by phase executors and operators.
    #[serde(default)]
    pub tasks: BTreeMap<String, Value>,
    /// Free-form key/value orchestration state.
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

impl OrchestrationState {
    pub fn phase(&self, phase: u32) -> Option<&PhaseRecord> {
        self.phases.get(&phase)
    }

    pub fn latest_checkpoint(&self) -> Option<&CheckpointRef> {
        self.checkpoints.iter().max_by_key(|c| c.timestamp)
    }

    /// Serialize to a JSON document.
    pub fn to_document(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Build a typed state from a JSON document. Goes through the textual
    /// form so integer phase keys are parsed the same way as on disk.
    pub fn from_document(doc: &Value) -> Result<Self, serde_json::Error> {
        let text = serde_json::to_string(doc)?;
        serde_json::from_str(&text)
    }
}
