//! Configuration file support for conductor.
//!
//! This module reads `.conductor/conductor.toml`. Every section has defaults,
//! so a missing or empty file is valid. Settings are layered
//! file → environment → CLI; the environment and CLI layers are applied by
//! [`crate::config::Config`].
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "pipeline"
//! executor_dir = "phase_executors"
//!
//! [defaults]
//! timeout_seconds = 3600
//! phase_zero_timeout_seconds = 1800
//! stuck_timeout_hours = 2.0
//! auto_checkpoint = true
//! timeout_backend = "auto"
//! mode = "automated"
//!
//! [phases.overrides."security-*"]
//! timeout_seconds = 7200
//! args = ["--deep"]
//!
//! [[notifications]]
//! event = "phase_error"
//! command = "./notify.sh"
//! timeout_secs = 30
//!
//! [watchdog]
//! signature = "conductor run"
//!
//! [logging]
//! level = "info"
//! json = false
//! file = true
//! ```

use crate::notify::NotificationDefinition;
use crate::phase::{DEFAULT_PHASE_ZERO_TIMEOUT_SECONDS, DEFAULT_TIMEOUT_SECONDS};
use crate::timeout::TimeoutBackend;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the config file inside the `.conductor` directory.
pub const CONFIG_FILE: &str = "conductor.toml";

/// How the orchestration loop treats eligible phases.
///
/// | Mode        | Behaviour                                           |
/// |-------------|-----------------------------------------------------|
/// | `Automated` | Run every eligible phase without asking             |
/// | `Manual`    | Confirm each phase interactively, stop on decline   |
/// | `DryRun`    | Print the plan, execute nothing, mutate nothing     |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    #[default]
    Automated,
    Manual,
    DryRun,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Automated => "automated",
            RunMode::Manual => "manual",
            RunMode::DryRun => "dry-run",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "automated" | "auto" => Ok(RunMode::Automated),
            "manual" => Ok(RunMode::Manual),
            "dry-run" | "dryrun" => Ok(RunMode::DryRun),
            _ => anyhow::bail!(
                "Invalid mode '{}'. Valid values: automated, manual, dry-run",
                s
            ),
        }
    }
}

/// Project-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (optional, defaults to directory name)
    #[serde(default)]
    pub name: Option<String>,
    /// Directory holding `phase_<N>_executor` programs, relative to the project
    #[serde(default)]
    pub executor_dir: Option<PathBuf>,
    /// Phase configuration file, relative to `.conductor/`
    #[serde(default)]
    pub phases_file: Option<PathBuf>,
    /// Success-criteria file, relative to `.conductor/`
    #[serde(default)]
    pub criteria_file: Option<PathBuf>,
}

/// Default settings for all phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_phase_zero_timeout_seconds")]
    pub phase_zero_timeout_seconds: u64,
    /// In-progress age after which a phase counts as stuck
    #[serde(default = "default_stuck_timeout_hours")]
    pub stuck_timeout_hours: f64,
    /// Create a checkpoint after every completed phase
    #[serde(default = "default_auto_checkpoint")]
    pub auto_checkpoint: bool,
    #[serde(default)]
    pub timeout_backend: TimeoutBackend,
    #[serde(default)]
    pub mode: RunMode,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_phase_zero_timeout_seconds() -> u64 {
    DEFAULT_PHASE_ZERO_TIMEOUT_SECONDS
}

fn default_stuck_timeout_hours() -> f64 {
    2.0
}

fn default_auto_checkpoint() -> bool {
    true
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            phase_zero_timeout_seconds: default_phase_zero_timeout_seconds(),
            stuck_timeout_hours: default_stuck_timeout_hours(),
            auto_checkpoint: default_auto_checkpoint(),
            timeout_backend: TimeoutBackend::default(),
            mode: RunMode::default(),
        }
    }
}

/// Phase-specific override settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseOverride {
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Extra executor arguments for matching phases
    #[serde(default)]
    pub args: Vec<String>,
}

/// Phase override configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhasesConfig {
    /// Pattern-based overrides keyed by phase-name glob
    #[serde(default)]
    pub overrides: BTreeMap<String, PhaseOverride>,
}

/// Instance Guard settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchdogSection {
    /// Command-line fragment identifying a running orchestrator
    #[serde(default)]
    pub signature: Option<String>,
    /// Mode used when the watchdog starts a new orchestrator
    #[serde(default)]
    pub mode: RunMode,
    /// Whether a watchdog-started orchestrator resumes failed phases
    #[serde(default)]
    pub resume: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write the log file as JSON lines
    #[serde(default)]
    pub json: bool,
    /// Also log to `.conductor/logs/`
    #[serde(default = "default_log_file")]
    pub file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> bool {
    true
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: default_log_file(),
        }
    }
}

/// Parsed `conductor.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorToml {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub phases: PhasesConfig,
    #[serde(default)]
    pub notifications: Vec<NotificationDefinition>,
    #[serde(default)]
    pub watchdog: WatchdogSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ConductorToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conductor.toml")
    }

    /// Load `conductor.toml` from the `.conductor` directory, or defaults.
    pub fn load_or_default(conductor_dir: &Path) -> Result<Self> {
        let config_path = conductor_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize conductor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Effective settings for one phase, applying pattern overrides in
    /// pattern order.
    pub fn phase_settings(&self, phase: u32, phase_name: &str) -> PhaseSettings {
        let mut settings = PhaseSettings {
            timeout_seconds: if phase == 0 {
                self.defaults.phase_zero_timeout_seconds
            } else {
                self.defaults.timeout_seconds
            },
            args: Vec::new(),
        };

        for (pattern, override_cfg) in &self.phases.overrides {
            if pattern_matches(pattern, phase_name) {
                if let Some(timeout) = override_cfg.timeout_seconds {
                    settings.timeout_seconds = timeout;
                }
                settings.args.extend(override_cfg.args.iter().cloned());
            }
        }

        settings
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.defaults.timeout_seconds == 0 {
            warnings.push("defaults.timeout_seconds is 0: every phase would time out".to_string());
        }
        if self.defaults.phase_zero_timeout_seconds == 0 {
            warnings.push("defaults.phase_zero_timeout_seconds is 0".to_string());
        }
        if self.defaults.stuck_timeout_hours <= 0.0 {
            warnings.push(format!(
                "defaults.stuck_timeout_hours is {}: every in-progress phase would count as stuck",
                self.defaults.stuck_timeout_hours
            ));
        }
        for (pattern, override_cfg) in &self.phases.overrides {
            if override_cfg.timeout_seconds == Some(0) {
                warnings.push(format!(
                    "Override for pattern '{}' sets timeout_seconds to 0",
                    pattern
                ));
            }
        }
        for (i, notification) in self.notifications.iter().enumerate() {
            if notification.command.trim().is_empty() {
                warnings.push(format!("notifications[{}] has an empty command", i));
            }
        }

        warnings
    }
}

/// Resolved settings for a specific phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSettings {
    pub timeout_seconds: u64,
    pub args: Vec<String>,
}

/// Check if a pattern matches a phase name.
/// Supports simple glob patterns:
/// - `*` matches any sequence of characters
/// - `?` matches any single character
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    glob_match(&pattern.to_lowercase(), &name.to_lowercase())
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let mut pattern_chars = pattern.chars().peekable();
    let mut text_chars = text.chars();

    while let Some(p) = pattern_chars.next() {
        match p {
            '*' => {
                while pattern_chars.peek() == Some(&'*') {
                    pattern_chars.next();
                }
                if pattern_chars.peek().is_none() {
                    return true;
                }

                let rest_pattern: String = pattern_chars.collect();
                let rest_text: Vec<char> = text_chars.collect();
                return (0..=rest_text.len()).any(|i| {
                    let tail: String = rest_text[i..].iter().collect();
                    glob_match(&rest_pattern, &tail)
                });
            }
            '?' => {
                if text_chars.next().is_none() {
                    return false;
                }
            }
            c => {
                if text_chars.next() != Some(c) {
                    return false;
                }
            }
        }
    }

    text_chars.next().is_none()
}

/// Commented template written by `conductor init`.
pub fn default_config_template() -> &'static str {
    r#"# conductor configuration

[project]
# executor_dir = "phase_executors"

[defaults]
timeout_seconds = 3600
phase_zero_timeout_seconds = 1800
stuck_timeout_hours = 2.0
auto_checkpoint = true
timeout_backend = "auto"
mode = "automated"

# [phases.overrides."security-*"]
# timeout_seconds = 7200

# [[notifications]]
# event = "phase_error"
# command = "./notify.sh"

[logging]
level = "info"
json = false
file = true
"#
}
