//! Error taxonomy shared by every pytoolbox component.
//!
//! Each variant carries the context a caller needs to act on the failure
//! (offending path, package name, underlying subprocess message). A non-zero
//! exit code from executed code is *not* an error; it is returned as data in
//! the sandbox `ExecutionResult`.

use serde_json::{json, Value};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolboxError>;

#[derive(Debug, Error)]
pub enum ToolboxError {
    #[error("Path escapes workspace: {path} (workspace: {})", .root.display())]
    PathViolation { path: String, root: PathBuf },

    #[error("Environment not found at {}: {reason}", .path.display())]
    EnvironmentNotFound { path: PathBuf, reason: String },

    #[error("Failed to create environment at {}: {message}", .path.display())]
    EnvironmentCreation { path: PathBuf, message: String },

    #[error("Failed to install '{package}': {message}")]
    DependencyInstall { package: String, message: String },

    #[error("Package '{package}' not found in the package index: {message}")]
    PackageNotFound { package: String, message: String },

    #[error("Invalid manifest {}: {message}", .path.display())]
    ManifestParse { path: PathBuf, message: String },

    #[error("Command timed out after {timeout_secs}s: {command}")]
    TimedOut { command: String, timeout_secs: u64 },

    #[error("Command failed: {command}: {message}")]
    Subprocess { command: String, message: String },

    #[error("Not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("Not a directory: {}", .path.display())]
    NotADirectory { path: PathBuf },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolboxError {
    /// Wrap an `io::Error` with a short description of what was being attempted.
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Stable snake_case tag, used as `error.kind` by the tool layer.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PathViolation { .. } => "path_violation",
            Self::EnvironmentNotFound { .. } => "environment_not_found",
            Self::EnvironmentCreation { .. } => "environment_creation_error",
            Self::DependencyInstall { .. } => "dependency_install_error",
            Self::PackageNotFound { .. } => "package_not_found",
            Self::ManifestParse { .. } => "manifest_parse_error",
            Self::TimedOut { .. } => "timed_out",
            Self::Subprocess { .. } => "subprocess_error",
            Self::NotFound { .. } => "not_found",
            Self::NotADirectory { .. } => "not_a_directory",
            Self::InvalidInput(_) => "invalid_input",
            Self::Io { .. } => "io_failure",
        }
    }

    /// Structured context for the error (everything except the message).
    pub fn details(&self) -> Value {
        match self {
            Self::PathViolation { path, root } => {
                json!({ "path": path, "root": root.display().to_string() })
            }
            Self::EnvironmentNotFound { path, reason } => {
                json!({ "path": path.display().to_string(), "reason": reason })
            }
            Self::EnvironmentCreation { path, message } => {
                json!({ "path": path.display().to_string(), "underlying": message })
            }
            Self::DependencyInstall { package, message }
            | Self::PackageNotFound { package, message } => {
                json!({ "package": package, "underlying": message })
            }
            Self::ManifestParse { path, message } => {
                json!({ "path": path.display().to_string(), "underlying": message })
            }
            Self::TimedOut {
                command,
                timeout_secs,
            } => json!({ "command": command, "timeout_secs": timeout_secs }),
            Self::Subprocess { command, message } => {
                json!({ "command": command, "underlying": message })
            }
            Self::NotFound { path } | Self::NotADirectory { path } => {
                json!({ "path": path.display().to_string() })
            }
            Self::InvalidInput(_) => json!({}),
            Self::Io { context, source } => {
                json!({ "context": context, "io_kind": format!("{:?}", source.kind()) })
            }
        }
    }

    /// `{"kind", "message", ...details}` rendering for JSON callers.
    pub fn to_json(&self) -> Value {
        let mut obj = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let (Some(map), Value::Object(extra)) = (obj.as_object_mut(), self.details()) {
            for (k, v) in extra {
                map.insert(k, v);
            }
        }
        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        let err = ToolboxError::PathViolation {
            path: "../etc/passwd".into(),
            root: PathBuf::from("/ws"),
        };
        assert_eq!(err.kind(), "path_violation");
        assert!(err.to_string().contains("../etc/passwd"));

        let err = ToolboxError::TimedOut {
            command: "pip install x".into(),
            timeout_secs: 5,
        };
        assert_eq!(err.kind(), "timed_out");
    }

    #[test]
    fn test_to_json_merges_details() {
        let err = ToolboxError::DependencyInstall {
            package: "requests==9.9".into(),
            message: "no matching distribution".into(),
        };
        let v = err.to_json();
        assert_eq!(v["kind"], "dependency_install_error");
        assert_eq!(v["package"], "requests==9.9");
        assert_eq!(v["underlying"], "no matching distribution");
        assert!(v["message"].as_str().unwrap().contains("requests==9.9"));
    }

    #[test]
    fn test_io_keeps_source() {
        let err = ToolboxError::io(
            "Read file a.txt",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind(), "io_failure");
        assert_eq!(err.details()["io_kind"], "PermissionDenied");
        assert!(std::error::Error::source(&err).is_some());
    }
}
