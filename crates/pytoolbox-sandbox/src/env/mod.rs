//! Isolated Python environments (venvs) inside the workspace.
//!
//! Environments are identified by directory: an [`Environment`] is a snapshot
//! of the layout found on disk and every accessor re-checks that layout, so a
//! venv deleted or recreated between calls is noticed instead of used stale.

pub mod builder;

pub use builder::{EnvironmentInfo, EnvironmentManager};

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use pytoolbox_core::{Result, ToolboxError};

use crate::runner::CommandSpec;

/// (script dir, interpreter, package manager) for the Unix and Windows venv layouts
const LAYOUTS: &[(&str, &str, &str)] = &[
    ("bin", "python", "pip"),
    ("Scripts", "python.exe", "pip.exe"),
];

/// Descriptor for a venv found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    root: PathBuf,
    #[serde(skip)]
    bin_dir: PathBuf,
    python: PathBuf,
    /// `None` when the venv was created without pip; `python -m pip` is used then
    pip: Option<PathBuf>,
}

impl Environment {
    /// Inspect `dir` and build a descriptor; `EnvironmentNotFound` if no interpreter layout exists.
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(ToolboxError::EnvironmentNotFound {
                path: dir.to_path_buf(),
                reason: "directory does not exist".to_string(),
            });
        }
        for (scripts, python, pip) in LAYOUTS {
            let bin_dir = dir.join(scripts);
            let python = bin_dir.join(python);
            if python.exists() {
                let pip = bin_dir.join(pip);
                return Ok(Self {
                    root: dir.to_path_buf(),
                    pip: pip.exists().then_some(pip),
                    bin_dir,
                    python,
                });
            }
        }
        Err(ToolboxError::EnvironmentNotFound {
            path: dir.to_path_buf(),
            reason: "no interpreter found (expected bin/python or Scripts/python.exe)".to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    /// Whether the interpreter is still present.
    pub fn is_valid(&self) -> bool {
        self.python.exists()
    }

    pub fn interpreter_path(&self) -> Result<&Path> {
        if self.python.exists() {
            Ok(&self.python)
        } else {
            Err(ToolboxError::EnvironmentNotFound {
                path: self.root.clone(),
                reason: format!("interpreter missing: {}", self.python.display()),
            })
        }
    }

    pub fn package_manager_path(&self) -> Result<&Path> {
        match self.pip {
            Some(ref pip) if pip.exists() => Ok(pip),
            _ => Err(ToolboxError::EnvironmentNotFound {
                path: self.root.clone(),
                reason: "package manager executable missing".to_string(),
            }),
        }
    }

    /// Interpreter invocation bound to this environment.
    pub fn python_command(&self, timeout: Duration) -> Result<CommandSpec> {
        let python = self.interpreter_path()?;
        Ok(self.bind(CommandSpec::new(python, timeout)))
    }

    /// Package-manager invocation: the pip executable, else `python -m pip`.
    pub fn pip_command(&self, timeout: Duration) -> Result<CommandSpec> {
        let python = self.interpreter_path()?;
        let spec = match self.package_manager_path() {
            Ok(pip) => CommandSpec::new(pip, timeout),
            Err(_) => CommandSpec::new(python, timeout).args(["-m", "pip"]),
        };
        Ok(self.bind(spec))
    }

    /// Apply the activation environment: `VIRTUAL_ENV`, `PATH` with the script
    /// dir first, UTF-8 stdio, and no inherited `PYTHONHOME`.
    pub fn bind(&self, spec: CommandSpec) -> CommandSpec {
        spec.env("VIRTUAL_ENV", &self.root)
            .env("PATH", self.bound_path())
            .env("PYTHONIOENCODING", "utf-8")
            .env_remove("PYTHONHOME")
    }

    /// `PATH` value with this environment's script directory prepended.
    pub fn bound_path(&self) -> OsString {
        let mut dirs = vec![self.bin_dir.clone()];
        if let Some(existing) = std::env::var_os("PATH") {
            dirs.extend(std::env::split_paths(&existing));
        }
        std::env::join_paths(dirs).unwrap_or_else(|_| self.bin_dir.clone().into_os_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn fake_venv(dir: &Path, with_pip: bool) {
        let bin = dir.join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("python"), "").unwrap();
        if with_pip {
            std::fs::write(bin.join("pip"), "").unwrap();
        }
    }

    #[test]
    fn test_open_unix_layout() {
        let tmp = tempfile::tempdir().unwrap();
        fake_venv(tmp.path(), true);
        let env = Environment::open(tmp.path()).unwrap();
        assert_eq!(env.interpreter_path().unwrap(), tmp.path().join("bin").join("python"));
        assert_eq!(env.package_manager_path().unwrap(), tmp.path().join("bin").join("pip"));
        assert!(env.is_valid());
    }

    #[test]
    fn test_open_windows_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let scripts = tmp.path().join("Scripts");
        std::fs::create_dir_all(&scripts).unwrap();
        std::fs::write(scripts.join("python.exe"), "").unwrap();
        let env = Environment::open(tmp.path()).unwrap();
        assert_eq!(env.bin_dir(), scripts.as_path());
        assert!(env.package_manager_path().is_err());
    }

    #[test]
    fn test_open_missing_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Environment::open(tmp.path()).unwrap_err();
        assert_eq!(err.kind(), "environment_not_found");
        let err = Environment::open(&tmp.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), "environment_not_found");
    }

    #[test]
    fn test_accessors_notice_deletion() {
        let tmp = tempfile::tempdir().unwrap();
        fake_venv(tmp.path(), true);
        let env = Environment::open(tmp.path()).unwrap();
        std::fs::remove_dir_all(tmp.path().join("bin")).unwrap();
        assert!(!env.is_valid());
        assert_eq!(env.interpreter_path().unwrap_err().kind(), "environment_not_found");
        assert!(env.python_command(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_pip_command_falls_back_to_module() {
        let tmp = tempfile::tempdir().unwrap();
        fake_venv(tmp.path(), false);
        let env = Environment::open(tmp.path()).unwrap();
        let spec = env.pip_command(Duration::from_secs(5)).unwrap();
        assert_eq!(spec.program, tmp.path().join("bin").join("python"));
        assert_eq!(spec.args_lossy(), vec!["-m", "pip"]);

        fake_venv(tmp.path(), true);
        let env = Environment::open(tmp.path()).unwrap();
        let spec = env.pip_command(Duration::from_secs(5)).unwrap();
        assert_eq!(spec.program, tmp.path().join("bin").join("pip"));
        assert!(spec.args.is_empty());
    }

    #[test]
    fn test_bind_sets_activation_variables() {
        let tmp = tempfile::tempdir().unwrap();
        fake_venv(tmp.path(), true);
        let env = Environment::open(tmp.path()).unwrap();
        let spec = env.python_command(Duration::from_secs(5)).unwrap();

        assert_eq!(spec.env_value("VIRTUAL_ENV"), Some(tmp.path().as_os_str()));
        assert_eq!(spec.env_value("PYTHONIOENCODING"), Some(std::ffi::OsStr::new("utf-8")));
        assert!(spec.env_remove.iter().any(|k| k == "PYTHONHOME"));
        let path = spec.env_value("PATH").unwrap();
        let first = std::env::split_paths(path).next().unwrap();
        assert_eq!(first, tmp.path().join("bin"));
    }
}
