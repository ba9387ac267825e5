//! Instance Guard bootstrap: `conductor ensure-running`.

use anyhow::Result;
use conductor::conductor_config::RunMode;
use conductor::config::Config;
use conductor::exit_codes;
use conductor::guard::{InstanceGuard, LaunchOptions, StartOutcome};

pub fn cmd_ensure_running(config: &Config, mode: Option<RunMode>, resume: bool) -> Result<i32> {
    let watchdog = &config.toml().watchdog;
    let options = LaunchOptions {
        mode: mode.unwrap_or(watchdog.mode),
        resume: resume || watchdog.resume,
    };

    let guard = InstanceGuard::from_config(config)?;
    match guard.ensure_started(options)? {
        StartOutcome::AlreadyRunning { pid } => {
            println!("Orchestrator already running (pid {})", pid);
        }
        StartOutcome::Started { pid } => {
            println!(
                "Started orchestrator (pid {}, mode {}{})",
                pid,
                options.mode,
                if options.resume { ", resume" } else { "" }
            );
        }
    }
    Ok(exit_codes::SUCCESS)
}
