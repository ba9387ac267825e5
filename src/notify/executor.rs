//! Command notification execution.
//!
//! A command notifier spawns `sh -c <command>`, writes the notification as
//! JSON to its stdin and waits for it under its own timeout. A non-zero exit
//! or a timeout is an error for the caller to log; it never reaches the
//! orchestration loop.

use super::Notifier;
use super::config::NotificationDefinition;
use super::types::PhaseNotification;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

pub struct CommandNotifier {
    definition: NotificationDefinition,
    project_dir: PathBuf,
}

impl CommandNotifier {
    pub fn new(definition: NotificationDefinition, project_dir: impl AsRef<Path>) -> Self {
        Self {
            definition,
            project_dir: project_dir.as_ref().to_path_buf(),
        }
    }

    fn working_dir(&self) -> PathBuf {
        match &self.definition.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.project_dir.join(dir),
            None => self.project_dir.clone(),
        }
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn notify(&self, notification: &PhaseNotification) -> Result<()> {
        if !self
            .definition
            .matches(notification.event, &notification.phase_name)
        {
            return Ok(());
        }

        let command = &self.definition.command;
        let payload = serde_json::to_string(notification)
            .context("Failed to serialize notification to JSON")?;

        tracing::debug!(
            event = %notification.event,
            phase = notification.phase,
            %command,
            "running notification command"
        );

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(self.working_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .env("CONDUCTOR_EVENT", notification.event.as_str())
            .env("CONDUCTOR_PHASE", notification.phase.to_string())
            .env("CONDUCTOR_PHASE_NAME", &notification.phase_name)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn notification command: {}", command))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A command that never reads stdin closes the pipe early; that is fine.
            let _ = stdin.write_all(payload.as_bytes()).await;
        }

        let limit = Duration::from_secs(self.definition.timeout_secs);
        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for notification command")?,
            Err(_) => bail!(
                "Notification command timed out after {} seconds",
                self.definition.timeout_secs
            ),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Notification command exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }
        Ok(())
    }
}
