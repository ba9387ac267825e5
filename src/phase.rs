//! Phase definitions and loading of the phase configuration file.
//!
//! This module provides:
//! - `PhaseEntry`: one phase as written in the configuration file (optional fields)
//! - `PhaseConfig`: the resolved, static description of a phase for one run
//! - `PhasesFile`: loading of `phases.json` / `phases.yaml`
//!
//! The file may either list phases under a `phases` array or key them by
//! phase number:
//!
//! ```json
//! { "phases": [ { "phase": 0, "name": "Discovery", "timeout_seconds": 1800 } ] }
//! { "0": { "name": "Discovery" }, "1": { "name": "Security audit", "dependencies": [0] } }
//! ```

use crate::conductor_config::ConductorToml;
use crate::errors::PlanError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Default per-phase execution timeout.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 3600;
/// Default execution timeout for phase 0.
pub const DEFAULT_PHASE_ZERO_TIMEOUT_SECONDS: u64 = 1800;

/// A phase as declared in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseEntry {
    /// Phase number; may be omitted in the keyed file form
    #[serde(default)]
    pub phase: Option<u32>,
    pub name: String,
    /// Explicit dependencies; defaults to the previous phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Executor path, relative to the project directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<PathBuf>,
    /// Phase-specific arguments placed before `--output <path>`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl PhaseEntry {
    pub fn new(phase: u32, name: &str) -> Self {
        Self {
            phase: Some(phase),
            name: name.to_string(),
            dependencies: None,
            timeout_seconds: None,
            executor: None,
            args: Vec::new(),
        }
    }

    /// Resolve defaults and config overrides into a `PhaseConfig`.
    pub fn resolve(&self, phase: u32, toml: &ConductorToml) -> PhaseConfig {
        let settings = toml.phase_settings(phase, &self.name);
        let mut args = settings.args;
        args.extend(self.args.iter().cloned());
        PhaseConfig {
            phase,
            name: self.name.clone(),
            dependencies: self
                .dependencies
                .clone()
                .unwrap_or_else(|| default_dependencies(phase)),
            timeout_seconds: self.timeout_seconds.unwrap_or(settings.timeout_seconds),
            executor: self.executor.clone(),
            args,
        }
    }
}

/// Static description of one phase for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseConfig {
    pub phase: u32,
    pub name: String,
    pub dependencies: Vec<u32>,
    pub timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl PhaseConfig {
    /// Build a config with default dependencies and timeout.
    pub fn new(phase: u32, name: &str) -> Self {
        Self {
            phase,
            name: name.to_string(),
            dependencies: default_dependencies(phase),
            timeout_seconds: default_timeout(phase),
            executor: None,
            args: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<u32>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_executor(mut self, executor: impl Into<PathBuf>) -> Self {
        self.executor = Some(executor.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Key used for the phase's output file name.
    pub fn name_key(&self) -> String {
        phase_name_key(&self.name)
    }
}

/// `[phase-1]` for phase > 0, nothing for phase 0.
pub fn default_dependencies(phase: u32) -> Vec<u32> {
    if phase == 0 { Vec::new() } else { vec![phase - 1] }
}

pub fn default_timeout(phase: u32) -> u64 {
    if phase == 0 {
        DEFAULT_PHASE_ZERO_TIMEOUT_SECONDS
    } else {
        DEFAULT_TIMEOUT_SECONDS
    }
}

/// Lowercase the name and collapse every run of non-alphanumerics to `_`.
pub fn phase_name_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !key.is_empty() {
                key.push('_');
            }
            pending_sep = false;
            key.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if key.is_empty() { "phase".to_string() } else { key }
}

/// The phase configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PhasesFile {
    pub phases: Vec<PhaseEntry>,
}

impl PhasesFile {
    /// Load from JSON or YAML, chosen by file extension.
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, PlanError> {
        let parse_err = |message: String| PlanError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let doc = parse_document(content, is_yaml(path)).map_err(parse_err)?;

        let phases = match doc {
            Value::Object(mut map) if map.contains_key("phases") => {
                let list = map.remove("phases").unwrap_or(Value::Null);
                serde_json::from_value::<Vec<PhaseEntry>>(list)
                    .map_err(|e| parse_err(e.to_string()))?
            }
            Value::Object(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (key, value) in map {
                    let number: u32 = key
                        .trim()
                        .parse()
                        .map_err(|_| parse_err(format!("'{}' is not a phase number", key)))?;
                    let mut entry: PhaseEntry =
                        serde_json::from_value(value).map_err(|e| parse_err(e.to_string()))?;
                    entry.phase = Some(number);
                    entries.push(entry);
                }
                entries
            }
            Value::Array(list) => serde_json::from_value::<Vec<PhaseEntry>>(Value::Array(list))
                .map_err(|e| parse_err(e.to_string()))?,
            _ => return Err(parse_err("expected an object or a list of phases".to_string())),
        };

        for entry in &phases {
            if entry.phase.is_none() {
                return Err(parse_err(format!("phase '{}' has no number", entry.name)));
            }
        }
        Ok(Self { phases })
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize phases to JSON")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write phases file: {}", path.display()))?;
        Ok(())
    }

    /// Resolve every entry against the config, sorted by phase number.
    pub fn resolve(&self, toml: &ConductorToml) -> Vec<PhaseConfig> {
        let mut resolved: Vec<PhaseConfig> = self
            .phases
            .iter()
            .filter_map(|e| e.phase.map(|n| e.resolve(n, toml)))
            .collect();
        resolved.sort_by_key(|p| p.phase);
        resolved
    }
}

/// Example pipeline written by `conductor init`.
pub fn example_phases() -> PhasesFile {
    PhasesFile {
        phases: vec![
            PhaseEntry::new(0, "Discovery analysis"),
            PhaseEntry::new(1, "Security audit"),
        ],
    }
}

pub(crate) fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Parse JSON, or YAML when `yaml` is set, into a JSON value. YAML goes
/// through its own value type so integer mapping keys become strings.
pub(crate) fn parse_document(content: &str, yaml: bool) -> Result<Value, String> {
    if yaml {
        let doc: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        serde_json::to_value(doc).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(content).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_default_dependencies() {
        assert!(default_dependencies(0).is_empty());
        assert_eq!(default_dependencies(1), vec![0]);
        assert_eq!(default_dependencies(7), vec![6]);
    }

    #[test]
    fn test_default_timeouts() {
        assert_eq!(PhaseConfig::new(0, "Discovery").timeout_seconds, 1800);
        assert_eq!(PhaseConfig::new(3, "Infra").timeout_seconds, 3600);
    }

    #[test]
    fn test_phase_name_key() {
        assert_eq!(phase_name_key("Discovery Analysis"), "discovery_analysis");
        assert_eq!(phase_name_key("  Security -- audit! "), "security_audit");
        assert_eq!(phase_name_key("Infra/Provisioning v2"), "infra_provisioning_v2");
        assert_eq!(phase_name_key("???"), "phase");
    }

    #[test]
    fn test_parse_list_form() {
        let json = r#"{
            "phases": [
                {"phase": 0, "name": "Discovery"},
                {"phase": 1, "name": "Audit", "dependencies": [], "timeout_seconds": 60,
                 "executor": "bin/audit", "args": ["--deep"]}
            ]
        }"#;
        let pf = PhasesFile::parse(json, Path::new("phases.json")).unwrap();
        let resolved = pf.resolve(&ConductorToml::default());
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].timeout_seconds, 1800);
        assert!(resolved[0].dependencies.is_empty());
        assert!(resolved[1].dependencies.is_empty());
        assert_eq!(resolved[1].timeout_seconds, 60);
        assert_eq!(resolved[1].executor, Some(PathBuf::from("bin/audit")));
        assert_eq!(resolved[1].args, vec!["--deep".to_string()]);
    }

    #[test]
    fn test_parse_keyed_form_sorts_and_defaults() {
        let json = r#"{
            "2": {"name": "Provision"},
            "0": {"name": "Discovery"},
            "1": {"name": "Audit"}
        }"#;
        let pf = PhasesFile::parse(json, Path::new("phases.json")).unwrap();
        let resolved = pf.resolve(&ConductorToml::default());
        let numbers: Vec<u32> = resolved.iter().map(|p| p.phase).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
        assert_eq!(resolved[2].dependencies, vec![1]);
    }

    #[test]
    fn test_parse_keyed_form_rejects_non_numeric_key() {
        let json = r#"{"first": {"name": "Discovery"}}"#;
        let err = PhasesFile::parse(json, Path::new("phases.json")).unwrap_err();
        assert!(err.to_string().contains("not a phase number"));
    }

    #[test]
    fn test_list_entry_without_number_is_rejected() {
        let json = r#"{"phases": [{"name": "Discovery"}]}"#;
        assert!(PhasesFile::parse(json, Path::new("phases.json")).is_err());
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("phases.yaml");
        fs::write(
            &path,
            "phases:\n  - phase: 0\n    name: Discovery\n  - phase: 1\n    name: Audit\n    timeout_seconds: 90\n",
        )
        .unwrap();
        let pf = PhasesFile::load(&path).unwrap();
        let resolved = pf.resolve(&ConductorToml::default());
        assert_eq!(resolved[1].timeout_seconds, 90);
        assert_eq!(resolved[1].dependencies, vec![0]);
    }

    #[test]
    fn test_config_overrides_apply_by_name_pattern() {
        let toml = ConductorToml::parse(
            r#"
[defaults]
timeout_seconds = 100

[phases.overrides."security-*"]
timeout_seconds = 42
args = ["--strict"]
"#,
        )
        .unwrap();
        let entry = PhaseEntry::new(2, "security-audit");
        let config = entry.resolve(2, &toml);
        assert_eq!(config.timeout_seconds, 42);
        assert_eq!(config.args, vec!["--strict".to_string()]);

        let other = PhaseEntry::new(3, "provision").resolve(3, &toml);
        assert_eq!(other.timeout_seconds, 100);
    }

    #[test]
    fn test_load_yaml_keyed_form() {
        let pf = PhasesFile::parse(
            "0:\n  name: Discovery\n1:\n  name: Audit\n",
            Path::new("phases.yml"),
        )
        .unwrap();
        let resolved = pf.resolve(&ConductorToml::default());
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[1].name, "Audit");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("phases.json");
        example_phases().save(&path).unwrap();
        let loaded = PhasesFile::load(&path).unwrap();
        assert_eq!(loaded.phases, example_phases().phases);
    }
}
