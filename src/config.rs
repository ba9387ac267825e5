use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::conductor_config::ConductorToml;
use crate::criteria::CriteriaFile;
use crate::phase::{PhaseConfig, PhasesFile};
use crate::scheduler::PhasePlan;

/// Directory holding every engine-owned file.
pub const CONDUCTOR_DIR: &str = ".conductor";
/// Default executor directory, relative to the project.
pub const DEFAULT_EXECUTOR_DIR: &str = "phase_executors";
/// Environment override for the executor directory.
pub const EXECUTOR_DIR_ENV: &str = "CONDUCTOR_EXECUTOR_DIR";

/// Runtime configuration for conductor.
///
/// Bridges `conductor.toml` with the paths the engine needs. It is built once
/// per invocation and handed to constructors; nothing reads it globally.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub conductor_dir: PathBuf,
    pub phases_file: PathBuf,
    pub criteria_file: PathBuf,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
    pub snapshot_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    pub executor_dir: PathBuf,
    pub verbose: bool,
    toml: ConductorToml,
}

impl Config {
    /// Load the configuration for `project_dir`, applying environment
    /// overrides.
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let toml = ConductorToml::load_or_default(&project_dir.join(CONDUCTOR_DIR))?;
        let mut config = Self::with_toml(project_dir, toml, verbose);

        if let Ok(dir) = std::env::var(EXECUTOR_DIR_ENV)
            && !dir.trim().is_empty()
        {
            config.executor_dir = config.project_dir.join(dir);
        }

        Ok(config)
    }

    /// Build a configuration from an already parsed `conductor.toml`.
    pub fn with_toml(project_dir: PathBuf, toml: ConductorToml, verbose: bool) -> Self {
        let conductor_dir = project_dir.join(CONDUCTOR_DIR);

        let phases_file = match &toml.project.phases_file {
            Some(path) => conductor_dir.join(path),
            None => find_with_extensions(&conductor_dir, "phases"),
        };
        let criteria_file = match &toml.project.criteria_file {
            Some(path) => conductor_dir.join(path),
            None => find_with_extensions(&conductor_dir, "success_criteria"),
        };
        let executor_dir = project_dir.join(
            toml.project
                .executor_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EXECUTOR_DIR)),
        );

        Self {
            state_file: conductor_dir.join("state.json"),
            lock_file: conductor_dir.join("state.lock"),
            snapshot_dir: conductor_dir.join("snapshots"),
            output_dir: conductor_dir.join("outputs"),
            log_dir: conductor_dir.join("logs"),
            phases_file,
            criteria_file,
            executor_dir,
            conductor_dir,
            project_dir,
            verbose,
            toml,
        }
    }

    /// The parsed `conductor.toml`.
    pub fn toml(&self) -> &ConductorToml {
        &self.toml
    }

    pub fn config_file(&self) -> PathBuf {
        self.conductor_dir.join(crate::conductor_config::CONFIG_FILE)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.conductor_dir)
            .context("Failed to create .conductor directory")?;
        std::fs::create_dir_all(&self.snapshot_dir)
            .context("Failed to create snapshots directory")?;
        std::fs::create_dir_all(&self.output_dir).context("Failed to create outputs directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// Load and resolve the phase configuration.
    pub fn load_phases(&self) -> Result<Vec<PhaseConfig>> {
        let file = PhasesFile::load(&self.phases_file).with_context(|| {
            format!(
                "No usable phase configuration. Run `conductor init` or create {}",
                self.phases_file.display()
            )
        })?;
        Ok(file.resolve(&self.toml))
    }

    /// Load the phase configuration and validate its dependency graph.
    pub fn load_plan(&self) -> Result<PhasePlan> {
        let phases = self.load_phases()?;
        PhasePlan::new(phases).context("Invalid phase configuration")
    }

    /// Load the success-criteria file; a missing file means no criteria.
    pub fn load_criteria(&self) -> Result<CriteriaFile> {
        if !self.criteria_file.exists() {
            return Ok(CriteriaFile::default());
        }
        CriteriaFile::load(&self.criteria_file)
    }
}

/// `<dir>/<stem>.json`, unless only a YAML variant exists.
fn find_with_extensions(dir: &Path, stem: &str) -> PathBuf {
    let json = dir.join(format!("{}.json", stem));
    if json.exists() {
        return json;
    }
    for ext in ["yaml", "yml"] {
        let candidate = dir.join(format!("{}.{}", stem, ext));
        if candidate.exists() {
            return candidate;
        }
    }
    json
}
