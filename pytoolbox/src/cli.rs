use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use pytoolbox_core::config::ToolboxConfig;

use crate::tools::{self, tool_definitions};
use crate::Toolbox;

/// pytoolbox - workspace-confined Python environments, dependencies and execution
#[derive(Parser, Debug)]
#[command(name = "pytoolbox")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Workspace root; every path is resolved inside it (default: current directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Execution timeout in seconds (default: from env or 30)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a file (optionally a 1-based inclusive line range)
    Read {
        path: String,
        #[arg(long)]
        start: Option<usize>,
        #[arg(long)]
        end: Option<usize>,
    },

    /// Write text to a file. Use "-" to read the content from stdin
    Write {
        path: String,
        content: String,
        #[arg(long)]
        append: bool,
    },

    /// Delete a file
    Delete { path: String },

    /// List a directory
    Ls {
        #[arg(default_value = ".")]
        path: String,
    },

    /// Create a directory (and parents)
    Mkdir { path: String },

    /// Create the virtual environment (no-op if it exists)
    Venv {
        /// Environment directory (default: from env or .venv)
        #[arg(long, value_name = "DIR")]
        env_dir: Option<String>,
    },

    /// Show interpreter, package manager and Python version
    VenvInfo {
        #[arg(long, value_name = "DIR")]
        env_dir: Option<String>,
    },

    /// Install a manifest (default: requirements.txt, then pyproject.toml)
    Install {
        manifest: Option<String>,
        #[arg(long, value_name = "DIR")]
        env_dir: Option<String>,
    },

    /// Install one requirement, e.g. "requests>=2.31"
    Add {
        spec: String,
        #[arg(long, value_name = "DIR")]
        env_dir: Option<String>,
    },

    /// Upgrade a package, optionally to an exact version
    Update {
        name: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long, value_name = "DIR")]
        env_dir: Option<String>,
    },

    /// List installed packages
    List {
        #[arg(long, value_name = "DIR")]
        env_dir: Option<String>,
    },

    /// Check installed packages for unmet requirements (exit 1 if any)
    Conflicts {
        #[arg(long, value_name = "DIR")]
        env_dir: Option<String>,
    },

    /// Print name==version lines; --write stores them in a requirements file
    Freeze {
        /// Write to this file instead of printing (e.g. requirements.txt)
        #[arg(long, value_name = "FILE")]
        write: Option<String>,
        #[arg(long, value_name = "DIR")]
        env_dir: Option<String>,
    },

    /// Run Python code in the environment. Use "-" to read the code from stdin
    Exec {
        code: String,
        #[arg(long, value_name = "DIR")]
        cwd: Option<String>,
        #[arg(long, value_name = "DIR")]
        env_dir: Option<String>,
    },

    /// Run a program in the environment (no shell)
    Run {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
        #[arg(long, value_name = "DIR")]
        cwd: Option<String>,
        #[arg(long, value_name = "DIR")]
        env_dir: Option<String>,
    },

    /// Print tool definitions as JSON
    Tools,

    /// Call a tool by name with JSON arguments
    Tool {
        name: String,
        #[arg(default_value = "{}")]
        args: String,
    },
}

/// How a command's result is shown.
enum Render {
    Json,
    /// Print this string field verbatim
    Field(&'static str),
    /// stdout/stderr passthrough, exit with the child's code
    Execution,
    /// JSON, exit 1 when `ok` is false
    Conflicts,
}

fn stdin_or(value: String) -> Result<String> {
    if value != "-" {
        return Ok(value);
    }
    let mut s = String::new();
    std::io::Read::read_to_string(&mut std::io::stdin(), &mut s).context("reading stdin")?;
    Ok(s)
}

/// Map a subcommand to its tool call.
fn to_tool_call(command: Commands) -> Result<(&'static str, Value, Render)> {
    Ok(match command {
        Commands::Read { path, start, end } => (
            "read_file",
            json!({ "path": path, "start_line": start, "end_line": end }),
            Render::Field("content"),
        ),
        Commands::Write { path, content, append } => (
            "write_file",
            json!({ "path": path, "content": stdin_or(content)?, "append": append }),
            Render::Json,
        ),
        Commands::Delete { path } => ("delete_file", json!({ "path": path }), Render::Json),
        Commands::Ls { path } => ("list_directory", json!({ "path": path }), Render::Json),
        Commands::Mkdir { path } => ("create_directory", json!({ "path": path }), Render::Json),
        Commands::Venv { env_dir } => ("create_venv", json!({ "env_dir": env_dir }), Render::Json),
        Commands::VenvInfo { env_dir } => {
            ("venv_info", json!({ "env_dir": env_dir }), Render::Json)
        }
        Commands::Install { manifest, env_dir } => (
            "install_dependencies",
            json!({ "manifest": manifest, "env_dir": env_dir }),
            Render::Json,
        ),
        Commands::Add { spec, env_dir } => (
            "install_package",
            json!({ "spec": spec, "env_dir": env_dir }),
            Render::Json,
        ),
        Commands::Update { name, version, env_dir } => (
            "update_package",
            json!({ "name": name, "version": version, "env_dir": env_dir }),
            Render::Json,
        ),
        Commands::List { env_dir } => {
            ("list_packages", json!({ "env_dir": env_dir }), Render::Json)
        }
        Commands::Conflicts { env_dir } => {
            ("check_conflicts", json!({ "env_dir": env_dir }), Render::Conflicts)
        }
        Commands::Freeze { write: Some(path), env_dir } => (
            "write_requirements",
            json!({ "path": path, "env_dir": env_dir }),
            Render::Json,
        ),
        Commands::Freeze { write: None, env_dir } => {
            ("freeze", json!({ "env_dir": env_dir }), Render::Field("requirements"))
        }
        Commands::Exec { code, cwd, env_dir } => (
            "execute_python",
            json!({ "code": stdin_or(code)?, "working_dir": cwd, "env_dir": env_dir }),
            Render::Execution,
        ),
        Commands::Run { command, cwd, env_dir } => (
            "run_command",
            json!({ "command": command, "working_dir": cwd, "env_dir": env_dir }),
            Render::Execution,
        ),
        Commands::Tools | Commands::Tool { .. } => {
            anyhow::bail!("tools/tool are handled before dispatch")
        }
    })
}

/// Run one command; returns the process exit code.
pub fn run(command: Commands, config: ToolboxConfig) -> Result<i32> {
    if let Commands::Tools = command {
        println!("{}", serde_json::to_string_pretty(&tool_definitions())?);
        return Ok(0);
    }

    let toolbox = Toolbox::new(config).context("opening workspace")?;

    if let Commands::Tool { name, args } = command {
        let args: Value = serde_json::from_str(&args).context("tool arguments must be JSON")?;
        let result = toolbox.execute_tool(&name, args);
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(if result.is_error { 1 } else { 0 });
    }

    let (name, args, render) = to_tool_call(command)?;
    let value = tools::call(&toolbox, name, args)?;

    match render {
        Render::Json => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(0)
        }
        Render::Field(field) => {
            print!("{}", value[field].as_str().unwrap_or_default());
            std::io::stdout().flush()?;
            Ok(0)
        }
        Render::Conflicts => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(if value["ok"].as_bool() == Some(true) { 0 } else { 1 })
        }
        Render::Execution => {
            print!("{}", value["stdout"].as_str().unwrap_or_default());
            eprint!("{}", value["stderr"].as_str().unwrap_or_default());
            std::io::stdout().flush()?;
            if value["timed_out"].as_bool() == Some(true) {
                tracing::warn!("Execution timed out");
                return Ok(124);
            }
            Ok(value["exit_code"].as_i64().map_or(1, |c| c as i32))
        }
    }
}
