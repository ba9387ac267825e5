//! Instance Guard.
//!
//! Best-effort "is an orchestrator already running for this project?" check
//! over the host process table, plus a bootstrap that starts one in the
//! background when none is found. The check-then-start sequence is racy: two
//! simultaneous bootstraps may both start an orchestrator. The state lock
//! makes the loser exit with the lock-held code, so state stays consistent.

use crate::conductor_config::RunMode;
use crate::config::Config;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A process visible in the host process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub cmdline: String,
    /// Working directory, when the platform exposes it
    pub cwd: Option<PathBuf>,
}

/// Source of running processes.
pub trait ProcessTable: Send + Sync {
    /// Every process except the current one.
    fn processes(&self) -> Result<Vec<ProcessEntry>>;
}

/// The host process table, read through `psutil`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PsutilProcessTable;

impl ProcessTable for PsutilProcessTable {
    fn processes(&self) -> Result<Vec<ProcessEntry>> {
        let own_pid = std::process::id();
        let all = psutil::process::processes()
            .map_err(|e| anyhow::anyhow!("Failed to read process table: {}", e))?;

        let mut entries = Vec::new();
        for process in all.into_iter().filter_map(|p| p.ok()) {
            if process.pid() == own_pid {
                continue;
            }
            // Processes that exit mid-scan or hide their cmdline are skipped.
            if let Ok(Some(cmdline)) = process.cmdline() {
                entries.push(ProcessEntry {
                    pid: process.pid(),
                    cmdline,
                    cwd: process_cwd(&process),
                });
            }
        }
        Ok(entries)
    }
}

#[cfg(target_os = "linux")]
fn process_cwd(process: &psutil::process::Process) -> Option<PathBuf> {
    process.cwd().ok()
}

#[cfg(not(target_os = "linux"))]
fn process_cwd(_process: &psutil::process::Process) -> Option<PathBuf> {
    None
}

/// How a watchdog-started orchestrator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaunchOptions {
    pub mode: RunMode,
    pub resume: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning { pid: u32 },
    Started { pid: u32 },
}

pub struct InstanceGuard {
    project_dir: PathBuf,
    signature: Option<String>,
    program: PathBuf,
    log_file: Option<PathBuf>,
    table: Box<dyn ProcessTable>,
}

impl InstanceGuard {
    pub fn new(project_dir: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            signature: None,
            program: program.into(),
            log_file: None,
            table: Box::new(PsutilProcessTable),
        }
    }

    /// Guard for the configured project, launching the current executable.
    pub fn from_config(config: &Config) -> Result<Self> {
        let program =
            std::env::current_exe().context("Failed to locate the conductor executable")?;
        let mut guard = Self::new(&config.project_dir, program);
        guard.signature = config.toml().watchdog.signature.clone();
        guard.log_file = Some(config.log_dir.join("orchestrator.out"));
        Ok(guard)
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_table(mut self, table: Box<dyn ProcessTable>) -> Self {
        self.table = table;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Pid of a running orchestrator for this project, if any.
    pub fn running_pid(&self) -> Result<Option<u32>> {
        let found = self
            .table
            .processes()?
            .into_iter()
            .find(|p| self.matches(p))
            .map(|p| p.pid);
        Ok(found)
    }

    pub fn is_running(&self) -> Result<bool> {
        Ok(self.running_pid()?.is_some())
    }

    /// Start an orchestrator in the background unless one is running.
    pub fn ensure_started(&self, options: LaunchOptions) -> Result<StartOutcome> {
        if let Some(pid) = self.running_pid()? {
            tracing::info!(pid, "orchestrator already running");
            return Ok(StartOutcome::AlreadyRunning { pid });
        }

        let mut command = Command::new(&self.program);
        command
            .arg("--project-dir")
            .arg(&self.project_dir)
            .arg("run")
            .arg("--mode")
            .arg(options.mode.as_str());
        if options.resume {
            command.arg("--resume");
        }
        command.current_dir(&self.project_dir).stdin(Stdio::null());

        match &self.log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create log directory {}", parent.display())
                    })?;
                }
                let out = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                let err = out.try_clone().context("Failed to duplicate log handle")?;
                command.stdout(out).stderr(err);
            }
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let child = command
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program.display()))?;
        let pid = child.id();
        tracing::info!(pid, mode = %options.mode, resume = options.resume, "orchestrator started");
        Ok(StartOutcome::Started { pid })
    }

    fn matches(&self, process: &ProcessEntry) -> bool {
        match &self.signature {
            Some(signature) => process.cmdline.contains(signature.as_str()),
            None => is_orchestrator_for(process, &self.project_dir),
        }
    }
}

/// `conductor ... run ...` for `project_dir`. Without `--project-dir` the
/// project is the process's working directory.
fn is_orchestrator_for(process: &ProcessEntry, project_dir: &Path) -> bool {
    let mut tokens = process.cmdline.split_whitespace();
    let Some(program) = tokens.next() else {
        return false;
    };
    let is_conductor = Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n == "conductor");
    let rest: Vec<&str> = tokens.collect();
    if !is_conductor || !rest.contains(&"run") {
        return false;
    }

    let target = match project_dir_arg(&rest) {
        Some(arg) => match &process.cwd {
            Some(cwd) if Path::new(arg).is_relative() => cwd.join(arg),
            _ => PathBuf::from(arg),
        },
        None => match &process.cwd {
            Some(cwd) => cwd.clone(),
            None => return false,
        },
    };
    same_dir(&target, project_dir)
}

fn project_dir_arg<'a>(args: &[&'a str]) -> Option<&'a str> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if *arg == "--project-dir" {
            return iter.next().copied();
        }
        if let Some(value) = arg.strip_prefix("--project-dir=") {
            return Some(value);
        }
    }
    None
}

fn same_dir(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
