//! Single adapter for every subprocess the toolbox starts.
//!
//! Components describe what to run with a [`CommandSpec`] and hand it to a
//! [`CommandRunner`]; they get back an [`ExecutionResult`] and never touch
//! `std::process` plumbing themselves. Tests swap in a scripted runner.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use pytoolbox_core::observability;
use pytoolbox_core::{Result, ToolboxError};

use crate::common::wait_with_limits;

/// Why the process was killed before it exited on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KillReason {
    Timeout,
    MemoryLimit,
}

/// Captured outcome of one subprocess. A non-zero `exit_code` is data, not an error.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code; `-1` when killed or terminated by a signal
    pub exit_code: i32,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kill_reason: Option<KillReason>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.kill_reason.is_none()
    }

    /// Text used when reporting a failed package-manager call: stderr, else stdout.
    pub fn failure_message(&self) -> String {
        let err = self.stderr.trim();
        if !err.is_empty() {
            return err.to_string();
        }
        let out = self.stdout.trim();
        if !out.is_empty() {
            return out.to_string();
        }
        format!("exited with code {}", self.exit_code)
    }
}

/// Description of a subprocess: program, arguments, working directory,
/// environment edits, and its bounds.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(OsString, OsString)>,
    pub env_remove: Vec<OsString>,
    pub timeout: Duration,
    pub memory_limit_mb: Option<u64>,
    /// Operation label used in logs and audit records
    pub label: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            env_remove: Vec::new(),
            timeout,
            memory_limit_mb: None,
            label: "command".to_string(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set a variable; a later call with the same key wins.
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        let key = key.as_ref().to_os_string();
        self.envs.retain(|(k, _)| *k != key);
        self.env_remove.retain(|k| *k != key);
        self.envs.push((key, value.as_ref().to_os_string()));
        self
    }

    pub fn env_remove(mut self, key: impl AsRef<OsStr>) -> Self {
        let key = key.as_ref().to_os_string();
        self.envs.retain(|(k, _)| *k != key);
        self.env_remove.push(key);
        self
    }

    pub fn memory_limit_mb(mut self, mb: Option<u64>) -> Self {
        self.memory_limit_mb = mb;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Value this spec assigns to `key`, if any.
    pub fn env_value(&self, key: &str) -> Option<&OsStr> {
        self.envs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }

    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Shell-like rendering for messages (not for re-execution).
    pub fn display(&self) -> String {
        let mut s = self.program.display().to_string();
        for a in &self.args {
            s.push(' ');
            s.push_str(&a.to_string_lossy());
        }
        s
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs().max(1)
    }
}

/// Runs a [`CommandSpec`] to completion (or to its bounds).
///
/// `Err` is reserved for failures to start or wait on the process; everything
/// the process itself does, including timing out, is reported in the result.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<ExecutionResult>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        (**self).run(spec)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    fn run(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        (**self).run(spec)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for Box<T> {
    fn run(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        (**self).run(spec)
    }
}

/// Real runner backed by `std::process`.
///
/// On Unix the child leads its own process group so a timeout kills
/// everything it spawned, not just the direct child.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn build(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = spec.cwd {
            cmd.current_dir(dir);
        }
        for key in &spec.env_remove {
            cmd.env_remove(key);
        }
        for (k, v) in &spec.envs {
            cmd.env(k, v);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let cwd = spec
            .cwd
            .as_deref()
            .map(|d| d.display().to_string())
            .unwrap_or_default();
        tracing::debug!(
            label = %spec.label,
            command = %spec.display(),
            cwd = %cwd,
            timeout_secs = spec.timeout.as_secs(),
            "Spawning subprocess"
        );
        observability::audit_execution_started(
            &spec.label,
            &spec.program.display().to_string(),
            &spec.args_lossy(),
            &cwd,
        );

        let start = Instant::now();
        let mut child = Self::build(spec).spawn().map_err(|e| ToolboxError::Subprocess {
            command: spec.display(),
            message: format!("failed to start: {}", e),
        })?;

        let memory_limit_bytes = spec.memory_limit_mb.map(mb_to_bytes);
        let outcome = wait_with_limits(&mut child, spec.timeout, memory_limit_bytes)
            .map_err(|e| ToolboxError::io(format!("Wait for {}", spec.display()), e))?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = ExecutionResult {
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            exit_code: outcome.exit_code,
            timed_out: outcome.kill_reason == Some(KillReason::Timeout),
            kill_reason: outcome.kill_reason,
            duration_ms,
        };

        observability::audit_execution_completed(
            &spec.label,
            result.exit_code,
            result.timed_out,
            duration_ms,
            result.stdout.len(),
        );
        if let Some(reason) = result.kill_reason {
            tracing::warn!(
                label = %spec.label,
                command = %spec.display(),
                reason = ?reason,
                duration_ms,
                "Subprocess killed"
            );
        } else {
            tracing::debug!(
                label = %spec.label,
                exit_code = result.exit_code,
                duration_ms,
                "Subprocess finished"
            );
        }
        Ok(result)
    }
}

/// Megabytes to bytes, pinned at `u64::MAX` for absurd limits.
fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}
