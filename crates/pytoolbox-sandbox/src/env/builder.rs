//! Create and locate venvs under the workspace root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use pytoolbox_core::config::{ToolboxConfig, DEFAULT_QUERY_TIMEOUT_SECS};
use pytoolbox_core::{PathGuard, ResolvedPath, Result, ToolboxError};

use super::Environment;
use crate::runner::{CommandRunner, CommandSpec, SystemRunner};

/// Names tried on `PATH` when no base interpreter is configured
const BASE_PYTHON_CANDIDATES: &[&str] = &["python3", "python"];

/// Snapshot returned by [`EnvironmentManager::info`].
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentInfo {
    /// Environment directory relative to the workspace root
    pub path: PathBuf,
    pub python: PathBuf,
    pub package_manager: Option<PathBuf>,
    pub python_version: Option<String>,
}

/// Provisions and locates environments. Holds no per-environment state.
#[derive(Debug, Clone)]
pub struct EnvironmentManager<R: CommandRunner = SystemRunner> {
    guard: PathGuard,
    default_dir: String,
    base_python: Option<PathBuf>,
    with_pip: bool,
    timeout: Duration,
    runner: R,
}

impl EnvironmentManager<SystemRunner> {
    pub fn new(guard: PathGuard, config: &ToolboxConfig) -> Self {
        Self::with_runner(guard, config, SystemRunner)
    }
}

impl<R: CommandRunner> EnvironmentManager<R> {
    pub fn with_runner(guard: PathGuard, config: &ToolboxConfig, runner: R) -> Self {
        Self {
            guard,
            default_dir: config.venv_dir.clone(),
            base_python: config.base_python.clone(),
            with_pip: config.with_pip,
            timeout: Duration::from_secs(config.venv_timeout_secs),
            runner,
        }
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Resolve the environment directory: `env_dir` when given, else the configured default.
    pub fn env_dir(&self, env_dir: Option<&str>) -> Result<ResolvedPath> {
        self.guard.resolve(env_dir.unwrap_or(&self.default_dir))
    }

    /// Descriptor for an existing environment; `EnvironmentNotFound` otherwise.
    pub fn locate(&self, env_dir: Option<&str>) -> Result<Environment> {
        let dir = self.env_dir(env_dir)?;
        Environment::open(&dir)
    }

    /// Provision an environment, or return the existing one unchanged.
    pub fn create(&self, env_dir: Option<&str>) -> Result<Environment> {
        let dir = self.env_dir(env_dir)?;
        if let Ok(env) = Environment::open(&dir) {
            tracing::debug!(path = %dir, "Environment already exists");
            return Ok(env);
        }

        let creation_err = |message: String| ToolboxError::EnvironmentCreation {
            path: dir.to_path_buf(),
            message,
        };

        let base = self.base_interpreter().map_err(creation_err)?;
        let mut spec = CommandSpec::new(&base, self.timeout)
            .args(["-m", "venv"])
            .current_dir(self.guard.root())
            .env_remove("PYTHONHOME")
            .label("create_venv");
        if !self.with_pip {
            spec = spec.arg("--without-pip");
        }
        let spec = spec.arg(dir.as_path());

        tracing::info!(
            path = %dir,
            base = %base.display(),
            with_pip = self.with_pip,
            "Creating environment"
        );
        let result = self.runner.run(&spec).map_err(|e| creation_err(e.to_string()))?;
        if result.timed_out {
            return Err(creation_err(format!(
                "venv creation timed out after {}s",
                spec.timeout_secs()
            )));
        }
        if !result.success() {
            return Err(creation_err(result.failure_message()));
        }

        let env = Environment::open(&dir).map_err(|e| {
            creation_err(format!("provisioning finished but layout is invalid: {}", e))
        })?;
        tracing::info!(path = %dir, python = %env.python.display(), "Environment created");
        Ok(env)
    }

    /// Locate the environment and query its interpreter version.
    pub fn info(&self, env_dir: Option<&str>) -> Result<EnvironmentInfo> {
        let dir = self.env_dir(env_dir)?;
        let env = Environment::open(&dir)?;
        let spec = env
            .python_command(Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS))?
            .arg("--version")
            .label("venv_info");
        let python_version = match self.runner.run(&spec) {
            Ok(r) if r.success() => {
                // Python 2 printed the version on stderr
                let text = if r.stdout.trim().is_empty() { &r.stderr } else { &r.stdout };
                Some(text.trim().trim_start_matches("Python ").to_string())
            }
            Ok(r) => {
                tracing::warn!(
                    path = %dir,
                    error = %r.failure_message(),
                    "Interpreter version query failed"
                );
                None
            }
            Err(e) => {
                tracing::warn!(path = %dir, error = %e, "Interpreter version query failed");
                None
            }
        };
        Ok(EnvironmentInfo {
            path: self.guard.relative(&dir),
            python: env.python.clone(),
            package_manager: env.pip.clone(),
            python_version,
        })
    }

    /// Base interpreter for `python -m venv`: the configured one, else the
    /// first candidate on `PATH`.
    fn base_interpreter(&self) -> std::result::Result<PathBuf, String> {
        if let Some(ref configured) = self.base_python {
            return resolve_program(configured).ok_or_else(|| {
                format!("configured base interpreter not found: {}", configured.display())
            });
        }
        BASE_PYTHON_CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| {
                format!(
                    "no base Python interpreter found on PATH (tried {})",
                    BASE_PYTHON_CANDIDATES.join(", ")
                )
            })
    }
}

fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return program.exists().then(|| program.to_path_buf());
    }
    which::which(program).ok()
}
