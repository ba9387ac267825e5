//! Notification events and the payload sent to notification commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase lifecycle events that trigger notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    /// The phase was marked in progress and its executor is about to launch
    PhaseStart,
    /// The phase finished successfully (including a missing executor)
    PhaseComplete,
    /// The phase failed or timed out
    PhaseError,
}

impl NotificationEvent {
    pub fn all() -> &'static [NotificationEvent] {
        &[
            NotificationEvent::PhaseStart,
            NotificationEvent::PhaseComplete,
            NotificationEvent::PhaseError,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::PhaseStart => "phase_start",
            NotificationEvent::PhaseComplete => "phase_complete",
            NotificationEvent::PhaseError => "phase_error",
        }
    }
}

impl std::fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NotificationEvent {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "phase_start" | "start" => Ok(NotificationEvent::PhaseStart),
            "phase_complete" | "complete" => Ok(NotificationEvent::PhaseComplete),
            "phase_error" | "error" => Ok(NotificationEvent::PhaseError),
            _ => anyhow::bail!(
                "Invalid notification event '{}'. Valid values: phase_start, phase_complete, phase_error",
                s
            ),
        }
    }
}

/// JSON document written to a notification command's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseNotification {
    pub event: NotificationEvent,
    pub phase: u32,
    pub phase_name: String,
    pub timestamp: DateTime<Utc>,
    /// Error text for `phase_error`, note text for soft successes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PhaseNotification {
    pub fn new(event: NotificationEvent, phase: u32, phase_name: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            event,
            phase,
            phase_name: phase_name.to_string(),
            timestamp,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
