//! Configuration structs grouped by concern, loaded from environment variables.

use super::env_keys::{limits, observability as obv_keys, paths};
use super::loader::{env_bool, env_optional, env_or, env_u64};
use std::path::PathBuf;

// ============================================================
// Subprocess bounds (single source of truth)
// ============================================================

/// Default bound for executed code / commands, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default bound for one package-manager install, in seconds
pub const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 300;

/// Default bound for `python -m venv`, in seconds
pub const DEFAULT_VENV_TIMEOUT_SECS: u64 = 120;

/// Default bound for metadata queries (`importlib.metadata` dump), in seconds
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;

/// Default environment directory, relative to the workspace root
pub const DEFAULT_VENV_DIR: &str = ".venv";

/// Everything a toolbox instance needs. Immutable once built.
#[derive(Debug, Clone)]
pub struct ToolboxConfig {
    /// Workspace root (canonicalized later by `PathGuard`)
    pub workspace: PathBuf,
    /// Default environment directory, relative to the workspace unless absolute
    pub venv_dir: String,
    /// Base interpreter for provisioning; discovered on PATH when `None`
    pub base_python: Option<PathBuf>,
    /// Whether new environments get pip installed (`python -m venv` without `--without-pip`)
    pub with_pip: bool,
    pub exec_timeout_secs: u64,
    pub install_timeout_secs: u64,
    pub venv_timeout_secs: u64,
    /// Optional RSS ceiling for executed code
    pub max_memory_mb: Option<u64>,
    /// Base directory for transient artifacts; system temp dir when `None`
    pub scratch_dir: Option<PathBuf>,
}

impl ToolboxConfig {
    /// Defaults for a given workspace, without consulting the environment.
    pub fn for_workspace(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            venv_dir: DEFAULT_VENV_DIR.to_string(),
            base_python: None,
            with_pip: true,
            exec_timeout_secs: DEFAULT_TIMEOUT_SECS,
            install_timeout_secs: DEFAULT_INSTALL_TIMEOUT_SECS,
            venv_timeout_secs: DEFAULT_VENV_TIMEOUT_SECS,
            max_memory_mb: None,
            scratch_dir: None,
        }
    }

    /// Load from `PYTOOLBOX_*` variables (and `.env`), falling back to defaults.
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        let workspace = env_optional(paths::PYTOOLBOX_WORKSPACE, &[])
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let mut cfg = Self::for_workspace(workspace);
        cfg.venv_dir = env_or(paths::PYTOOLBOX_VENV_DIR, paths::VENV_DIR_ALIASES, || {
            DEFAULT_VENV_DIR.to_string()
        });
        cfg.base_python = env_optional(paths::PYTOOLBOX_PYTHON, &[]).map(PathBuf::from);
        cfg.scratch_dir = env_optional(paths::PYTOOLBOX_SCRATCH_DIR, &[]).map(PathBuf::from);
        if let Some(secs) = env_u64(limits::PYTOOLBOX_TIMEOUT_SECS, &[]) {
            cfg.exec_timeout_secs = secs;
        }
        if let Some(secs) = env_u64(limits::PYTOOLBOX_INSTALL_TIMEOUT_SECS, &[]) {
            cfg.install_timeout_secs = secs;
        }
        if let Some(secs) = env_u64(limits::PYTOOLBOX_VENV_TIMEOUT_SECS, &[]) {
            cfg.venv_timeout_secs = secs;
        }
        cfg.max_memory_mb = env_u64(limits::PYTOOLBOX_MAX_MEMORY_MB, &[]).filter(|mb| *mb > 0);
        cfg
    }

    /// Override with CLI parameters
    pub fn with_cli_overrides(mut self, workspace: Option<PathBuf>, timeout: Option<u64>) -> Self {
        if let Some(ws) = workspace {
            self.workspace = ws;
        }
        if let Some(secs) = timeout {
            self.exec_timeout_secs = secs;
        }
        self
    }
}

/// Observability settings: quiet, log level, JSON logs, audit / security event sinks.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
    pub security_events_log: Option<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            super::loader::load_dotenv();
            Self {
                quiet: env_bool(obv_keys::PYTOOLBOX_QUIET, &[], false),
                log_level: env_or(obv_keys::PYTOOLBOX_LOG_LEVEL, &[], || {
                    "pytoolbox=info".to_string()
                }),
                log_json: env_bool(obv_keys::PYTOOLBOX_LOG_JSON, &[], false),
                audit_log: env_optional(obv_keys::PYTOOLBOX_AUDIT_LOG, &[]),
                security_events_log: env_optional(obv_keys::PYTOOLBOX_SECURITY_EVENTS_LOG, &[]),
            }
        })
    }
}
