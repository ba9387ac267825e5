//! Fire-and-forget phase notifications.
//!
//! Notifications are emitted on `phase_start`, `phase_complete` and
//! `phase_error`. They are configured in `conductor.toml`:
//!
//! ```toml
//! [[notifications]]
//! event = "phase_error"
//! match = "security-*"
//! command = "./scripts/page-oncall.sh"
//! timeout_secs = 10
//! ```
//!
//! A notifier failure is logged at `warn` and otherwise ignored; it can never
//! abort the orchestration loop.

pub mod config;
pub mod executor;
pub mod types;

pub use config::NotificationDefinition;
pub use executor::CommandNotifier;
pub use types::{NotificationEvent, PhaseNotification};

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// A sink for phase notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &PhaseNotification) -> Result<()>;
}

/// Dispatches notifications to every configured notifier.
#[derive(Clone, Default)]
pub struct NotificationManager {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationManager {
    /// A manager with no notifiers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// One command notifier per definition.
    pub fn from_definitions(project_dir: impl AsRef<Path>, definitions: &[NotificationDefinition]) -> Self {
        let project_dir = project_dir.as_ref();
        Self {
            notifiers: definitions
                .iter()
                .filter(|d| d.enabled)
                .map(|d| Arc::new(CommandNotifier::new(d.clone(), project_dir)) as Arc<dyn Notifier>)
                .collect(),
        }
    }

    pub fn add(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Deliver `notification` to every notifier, swallowing failures.
    pub async fn emit(&self, notification: PhaseNotification) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&notification).await {
                tracing::warn!(
                    event = %notification.event,
                    phase = notification.phase,
                    error = %e,
                    "notification failed"
                );
            }
        }
    }
}
