//! `conductor init`: create the `.conductor/` directory structure.
//!
//! ```text
//! .conductor/
//! ├── conductor.toml   # Settings (commented defaults)
//! ├── phases.json      # Example two-phase pipeline
//! ├── snapshots/       # Checkpoint files
//! ├── outputs/         # Executor --output targets
//! └── logs/            # Rolling log files
//! phase_executors/     # Executors, phase_<N>_executor[.*]
//! ```
//!
//! Existing files are never overwritten, so running it twice is harmless.

use crate::conductor_config::{CONFIG_FILE, default_config_template};
use crate::config::{CONDUCTOR_DIR, DEFAULT_EXECUTOR_DIR};
use crate::phase::example_phases;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const PHASES_CANDIDATES: [&str; 3] = ["phases.json", "phases.yaml", "phases.yml"];

/// Result of initializing a project.
#[derive(Debug)]
pub struct InitResult {
    pub conductor_dir: PathBuf,
    /// False if `.conductor/` already existed
    pub created: bool,
    pub wrote_config: bool,
    pub wrote_phases: bool,
}

pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let conductor_dir = get_conductor_dir(project_dir);
    let created = !conductor_dir.exists();

    for dir in [
        conductor_dir.clone(),
        conductor_dir.join("snapshots"),
        conductor_dir.join("outputs"),
        conductor_dir.join("logs"),
        project_dir.join(DEFAULT_EXECUTOR_DIR),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config_file = conductor_dir.join(CONFIG_FILE);
    let wrote_config = !config_file.exists();
    if wrote_config {
        std::fs::write(&config_file, default_config_template())
            .with_context(|| format!("Failed to create {}", config_file.display()))?;
    }

    let wrote_phases = !has_phases(project_dir);
    if wrote_phases {
        example_phases().save(&conductor_dir.join(PHASES_CANDIDATES[0]))?;
    }

    tracing::info!(dir = %conductor_dir.display(), created, "project initialized");
    Ok(InitResult {
        conductor_dir,
        created,
        wrote_config,
        wrote_phases,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    get_conductor_dir(project_dir).is_dir()
}

pub fn get_conductor_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(CONDUCTOR_DIR)
}

/// Whether any phase configuration file exists.
pub fn has_phases(project_dir: &Path) -> bool {
    let dir = get_conductor_dir(project_dir);
    PHASES_CANDIDATES.iter().any(|name| dir.join(name).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor_config::ConductorToml;
    use crate::phase::PhasesFile;
    use tempfile::tempdir;

    #[test]
    fn test_init_creates_structure() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path()).unwrap();

        assert!(result.created);
        assert!(result.wrote_config);
        assert!(result.wrote_phases);
        let conductor = dir.path().join(".conductor");
        assert_eq!(result.conductor_dir, conductor);
        for sub in ["snapshots", "outputs", "logs"] {
            assert!(conductor.join(sub).is_dir(), "{} missing", sub);
        }
        assert!(dir.path().join("phase_executors").is_dir());
        assert!(is_initialized(dir.path()));
    }

    #[test]
    fn test_written_files_parse() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let conductor = dir.path().join(".conductor");

        ConductorToml::load(&conductor.join("conductor.toml")).unwrap();
        let phases = PhasesFile::load(&conductor.join("phases.json")).unwrap();
        assert_eq!(phases.phases.len(), 2);
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let phases = dir.path().join(".conductor/phases.json");
        std::fs::write(&phases, r#"{"phases": [{"phase": 0, "name": "Only"}]}"#).unwrap();

        let again = init_project(dir.path()).unwrap();
        assert!(!again.created);
        assert!(!again.wrote_config);
        assert!(!again.wrote_phases);
        assert!(std::fs::read_to_string(&phases).unwrap().contains("Only"));
    }

    #[test]
    fn test_yaml_phases_count_as_present() {
        let dir = tempdir().unwrap();
        let conductor = dir.path().join(".conductor");
        std::fs::create_dir_all(&conductor).unwrap();
        std::fs::write(conductor.join("phases.yaml"), "phases: []\n").unwrap();

        let result = init_project(dir.path()).unwrap();
        assert!(!result.wrote_phases);
        assert!(!conductor.join("phases.json").exists());
    }
}
