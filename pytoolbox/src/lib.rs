//! pytoolbox library: the [`Toolbox`] facade, tool dispatch, and the CLI entry
//! point shared with the `pytoolbox` binary.

mod cli;
pub mod tools;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde_json::Value;

use pytoolbox_core::config::{self, ToolboxConfig};
use pytoolbox_core::PathGuard;
use pytoolbox_deps::DependencyResolver;
use pytoolbox_fs::FileOperations;
use pytoolbox_sandbox::{CommandRunner, EnvironmentManager, Executor, SystemRunner};

pub use tools::{tool_definitions, ToolDefinition, ToolResult};

/// Runner shared by every component of one toolbox.
pub type SharedRunner = Arc<dyn CommandRunner>;

/// All components built from one immutable config, confined to one workspace.
pub struct Toolbox {
    config: ToolboxConfig,
    files: FileOperations,
    envs: EnvironmentManager<SharedRunner>,
    deps: DependencyResolver<SharedRunner>,
    executor: Executor<SharedRunner>,
}

impl Toolbox {
    pub fn new(config: ToolboxConfig) -> pytoolbox_core::Result<Self> {
        Self::with_runner(config, Arc::new(SystemRunner))
    }

    pub fn with_runner(
        config: ToolboxConfig,
        runner: SharedRunner,
    ) -> pytoolbox_core::Result<Self> {
        let guard = PathGuard::new(&config.workspace)?;
        tracing::debug!(workspace = %guard.root().display(), "Toolbox ready");
        Ok(Self {
            files: FileOperations::new(guard.clone()),
            envs: EnvironmentManager::with_runner(guard.clone(), &config, Arc::clone(&runner)),
            deps: DependencyResolver::with_runner(guard.clone(), &config, Arc::clone(&runner)),
            executor: Executor::with_runner(guard, &config, runner),
            config,
        })
    }

    pub fn config(&self) -> &ToolboxConfig {
        &self.config
    }

    pub fn guard(&self) -> &PathGuard {
        self.files.guard()
    }

    pub fn files(&self) -> &FileOperations {
        &self.files
    }

    pub fn environments(&self) -> &EnvironmentManager<SharedRunner> {
        &self.envs
    }

    pub fn dependencies(&self) -> &DependencyResolver<SharedRunner> {
        &self.deps
    }

    pub fn executor(&self) -> &Executor<SharedRunner> {
        &self.executor
    }

    /// Dispatch a tool call and wrap the outcome for JSON callers.
    pub fn execute_tool(&self, name: &str, args: Value) -> ToolResult {
        tools::execute_tool(self, name, args)
    }
}

/// Parse arguments, set up config and tracing, and run one command.
pub fn run_cli() -> Result<()> {
    config::load_dotenv();
    pytoolbox_core::observability::init_tracing();
    let cli = cli::Cli::parse();
    let config = ToolboxConfig::from_env().with_cli_overrides(cli.workspace.clone(), cli.timeout);
    let code = cli::run(cli.command, config)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
