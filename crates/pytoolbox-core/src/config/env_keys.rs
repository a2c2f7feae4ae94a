//! Environment variable keys.
//!
//! Primary variables use the `PYTOOLBOX_*` prefix.

/// Workspace and virtual environment locations
pub mod paths {
    pub const PYTOOLBOX_WORKSPACE: &str = "PYTOOLBOX_WORKSPACE";

    /// Environment directory, relative to the workspace unless absolute
    pub const PYTOOLBOX_VENV_DIR: &str = "PYTOOLBOX_VENV_DIR";
    pub const VENV_DIR_ALIASES: &[&str] = &["VIRTUAL_ENV_DIR"];

    /// Base interpreter used to provision new environments
    pub const PYTOOLBOX_PYTHON: &str = "PYTOOLBOX_PYTHON";

    /// Where Executor materializes transient artifacts
    pub const PYTOOLBOX_SCRATCH_DIR: &str = "PYTOOLBOX_SCRATCH_DIR";
}

/// Subprocess bounds
pub mod limits {
    pub const PYTOOLBOX_TIMEOUT_SECS: &str = "PYTOOLBOX_TIMEOUT_SECS";
    pub const PYTOOLBOX_INSTALL_TIMEOUT_SECS: &str = "PYTOOLBOX_INSTALL_TIMEOUT_SECS";
    pub const PYTOOLBOX_VENV_TIMEOUT_SECS: &str = "PYTOOLBOX_VENV_TIMEOUT_SECS";
    pub const PYTOOLBOX_MAX_MEMORY_MB: &str = "PYTOOLBOX_MAX_MEMORY_MB";
}

/// Observability and logging
pub mod observability {
    pub const PYTOOLBOX_QUIET: &str = "PYTOOLBOX_QUIET";
    pub const PYTOOLBOX_LOG_LEVEL: &str = "PYTOOLBOX_LOG_LEVEL";
    pub const PYTOOLBOX_LOG_JSON: &str = "PYTOOLBOX_LOG_JSON";
    pub const PYTOOLBOX_AUDIT_LOG: &str = "PYTOOLBOX_AUDIT_LOG";
    pub const PYTOOLBOX_SECURITY_EVENTS_LOG: &str = "PYTOOLBOX_SECURITY_EVENTS_LOG";
}
