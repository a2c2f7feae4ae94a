//! Run Python source or a command inside an environment.
//!
//! Source text is written to `snippet.py` inside a fresh scratch directory that
//! is removed when the call returns, whatever the outcome. Each call gets its
//! own directory, so concurrent runs never share an artifact. Runs that share a
//! working directory can still race on files the executed code writes there.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tempfile::TempDir;

use pytoolbox_core::config::ToolboxConfig;
use pytoolbox_core::{PathGuard, ResolvedPath, Result, ToolboxError};

use crate::env::Environment;
use crate::runner::{CommandRunner, CommandSpec, ExecutionResult, SystemRunner};

const SNIPPET_FILE: &str = "snippet.py";
const SCRATCH_PREFIX: &str = "pytoolbox-run-";

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// Python source, run with the environment's interpreter
    Code(String),
    /// Program and arguments; `python`/`pip` map to the environment's executables
    Command(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Executor<R: CommandRunner = SystemRunner> {
    guard: PathGuard,
    default_timeout: Duration,
    memory_limit_mb: Option<u64>,
    scratch_dir: Option<PathBuf>,
    runner: R,
}

impl Executor<SystemRunner> {
    pub fn new(guard: PathGuard, config: &ToolboxConfig) -> Self {
        Self::with_runner(guard, config, SystemRunner)
    }
}

impl<R: CommandRunner> Executor<R> {
    pub fn with_runner(guard: PathGuard, config: &ToolboxConfig, runner: R) -> Self {
        Self {
            guard,
            default_timeout: Duration::from_secs(config.exec_timeout_secs),
            memory_limit_mb: config.max_memory_mb,
            scratch_dir: config.scratch_dir.clone(),
            runner,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `payload` in `env`. A non-zero exit or a timeout is reported in the
    /// result; `Err` means the run could not be set up or started.
    pub fn run(
        &self,
        env: &Environment,
        payload: &Payload,
        working_dir: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        let cwd = self.working_dir(working_dir)?;
        let timeout = timeout.unwrap_or(self.default_timeout);

        // Held until the process is gone; dropping it deletes the snippet.
        let mut scratch: Option<TempDir> = None;
        let spec = match payload {
            Payload::Code(code) => {
                let dir = self.scratch()?;
                let script = dir.path().join(SNIPPET_FILE);
                std::fs::write(&script, code).map_err(|e| {
                    ToolboxError::io(format!("Write {}", script.display()), e)
                })?;
                scratch = Some(dir);
                env.python_command(timeout)?
                    .arg(&script)
                    .label("execute_python")
            }
            Payload::Command(argv) => command_spec(env, argv, &cwd, timeout)?.label("run_command"),
        };
        let spec = spec
            .current_dir(cwd.as_path())
            .memory_limit_mb(self.memory_limit_mb);

        tracing::info!(
            label = %spec.label,
            cwd = %cwd,
            env = %env.root().display(),
            timeout_secs = timeout.as_secs(),
            "Executing"
        );
        let result = self.runner.run(&spec);

        if let Some(dir) = scratch {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to remove scratch directory"
                );
            }
        }

        let result = result?;
        if result.timed_out {
            tracing::warn!(
                label = %spec.label,
                timeout_secs = timeout.as_secs(),
                "Execution timed out"
            );
        }
        Ok(result)
    }

    fn working_dir(&self, working_dir: Option<&str>) -> Result<ResolvedPath> {
        let dir = self.guard.resolve(working_dir.unwrap_or("."))?;
        if !dir.is_dir() {
            return Err(ToolboxError::NotADirectory {
                path: PathBuf::from(working_dir.unwrap_or(".")),
            });
        }
        Ok(dir)
    }

    fn scratch(&self) -> Result<TempDir> {
        let base = match self.scratch_dir {
            Some(ref dir) => {
                std::fs::create_dir_all(dir).map_err(|e| {
                    ToolboxError::io(format!("Create scratch directory {}", dir.display()), e)
                })?;
                dir.clone()
            }
            None => std::env::temp_dir(),
        };
        tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&base)
            .map_err(|e| ToolboxError::io(format!("Create temp dir in {}", base.display()), e))
    }
}

/// Build the spec for a command payload, mapping `python`/`pip` onto the environment.
fn command_spec(
    env: &Environment,
    argv: &[String],
    cwd: &Path,
    timeout: Duration,
) -> Result<CommandSpec> {
    let (program, rest) = argv
        .split_first()
        .ok_or_else(|| ToolboxError::invalid_input("command must not be empty"))?;
    let spec = match program.as_str() {
        "python" | "python3" | "python.exe" => env.python_command(timeout)?,
        "pip" | "pip3" | "pip.exe" => env.pip_command(timeout)?,
        other => {
            // Look the program up on the environment's PATH, not ours.
            let resolved = which::which_in(other, Some(env.bound_path()), cwd)
                .unwrap_or_else(|_| PathBuf::from(other));
            env.bind(CommandSpec::new(resolved, timeout))
        }
    };
    Ok(spec.args(rest))
}
