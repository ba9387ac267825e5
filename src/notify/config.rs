//! Notification command definitions, read from `[[notifications]]` in
//! `conductor.toml`.

use super::types::NotificationEvent;
use crate::conductor_config::pattern_matches;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single notification command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDefinition {
    pub event: NotificationEvent,

    /// Optional glob matched against the phase name
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub phase_match: Option<String>,

    /// Shell command, run with `sh -c`
    pub command: String,

    /// Working directory, relative to the project directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timeout() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

impl NotificationDefinition {
    pub fn command(event: NotificationEvent, command: impl Into<String>) -> Self {
        Self {
            event,
            phase_match: None,
            command: command.into(),
            working_dir: None,
            timeout_secs: default_timeout(),
            enabled: true,
        }
    }

    pub fn with_match(mut self, pattern: impl Into<String>) -> Self {
        self.phase_match = Some(pattern.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Whether this definition fires for `event` on a phase named `phase_name`.
    pub fn matches(&self, event: NotificationEvent, phase_name: &str) -> bool {
        if !self.enabled || self.event != event {
            return false;
        }
        match &self.phase_match {
            Some(pattern) => pattern_matches(pattern, phase_name),
            None => true,
        }
    }
}
