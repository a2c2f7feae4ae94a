//! Tool layer: every toolbox operation as a named tool with a JSON Schema,
//! plus the dispatch that routes a call to its component.
//!
//! Results are JSON. Failures come back as `{"error": {"kind", "message", ...}}`
//! with `is_error` set, never as a panic or a transport error.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use pytoolbox_core::{Result, ToolboxError};
use pytoolbox_deps::PackageSpec;
use pytoolbox_sandbox::{Environment, Payload};

use crate::Toolbox;

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub content: Value,
    pub is_error: bool,
}

impl ToolResult {
    fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    fn err(error: &ToolboxError) -> Self {
        Self {
            content: json!({ "error": error.to_json() }),
            is_error: true,
        }
    }
}

const ENV_DIR_PROP: &str =
    "Environment directory relative to the workspace (default: configured venv dir)";

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn env_only_schema() -> Value {
    schema(json!({ "env_dir": { "type": "string", "description": ENV_DIR_PROP } }), &[])
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "read_file",
            description: "Read a UTF-8 text file inside the workspace. start_line/end_line \
                (1-based, inclusive) select a line range.",
            input_schema: schema(
                json!({
                    "path": {
                        "type": "string",
                        "description": "File path relative to the workspace"
                    },
                    "start_line": { "type": "integer", "minimum": 1 },
                    "end_line": { "type": "integer", "minimum": 1 }
                }),
                &["path"],
            ),
        },
        ToolDefinition {
            name: "write_file",
            description: "Write text to a file inside the workspace, creating parent directories. \
                append: true appends instead of overwriting.",
            input_schema: schema(
                json!({
                    "path": {
                        "type": "string",
                        "description": "File path relative to the workspace"
                    },
                    "content": { "type": "string" },
                    "append": { "type": "boolean", "default": false }
                }),
                &["path", "content"],
            ),
        },
        ToolDefinition {
            name: "delete_file",
            description: "Delete a regular file inside the workspace. Directories are not removed.",
            input_schema: schema(json!({ "path": { "type": "string" } }), &["path"]),
        },
        ToolDefinition {
            name: "list_directory",
            description: "List a directory's entries with type, size and modification time.",
            input_schema: schema(
                json!({
                    "path": {
                        "type": "string",
                        "description": "Directory relative to the workspace (default: root)"
                    }
                }),
                &[],
            ),
        },
        ToolDefinition {
            name: "create_directory",
            description: "Create a directory and any missing parents inside the workspace.",
            input_schema: schema(json!({ "path": { "type": "string" } }), &["path"]),
        },
        ToolDefinition {
            name: "create_venv",
            description: "Create a Python virtual environment. Returns the existing one unchanged \
                if already present.",
            input_schema: env_only_schema(),
        },
        ToolDefinition {
            name: "venv_info",
            description: "Show the interpreter, package manager and Python version of an \
                environment.",
            input_schema: env_only_schema(),
        },
        ToolDefinition {
            name: "install_dependencies",
            description: "Install every requirement of a manifest (requirements.txt or \
                pyproject.toml) one by one, stopping at the first failure.",
            input_schema: schema(
                json!({
                    "manifest": {
                        "type": "string",
                        "description":
                            "Manifest path (default: requirements.txt, then pyproject.toml)"
                    },
                    "env_dir": { "type": "string", "description": ENV_DIR_PROP }
                }),
                &[],
            ),
        },
        ToolDefinition {
            name: "install_package",
            description: "Install one requirement, e.g. \"requests>=2.31\".",
            input_schema: schema(
                json!({
                    "spec": { "type": "string", "description": "PEP 508 requirement" },
                    "env_dir": { "type": "string", "description": ENV_DIR_PROP }
                }),
                &["spec"],
            ),
        },
        ToolDefinition {
            name: "list_packages",
            description: "List installed distributions with their versions and declared \
                requirements.",
            input_schema: env_only_schema(),
        },
        ToolDefinition {
            name: "check_conflicts",
            description: "Report installed packages whose declared requirements are not met by \
                the installed versions.",
            input_schema: env_only_schema(),
        },
        ToolDefinition {
            name: "update_package",
            description: "Upgrade a package to the latest release, or to an exact version.",
            input_schema: schema(
                json!({
                    "name": { "type": "string" },
                    "version": {
                        "type": "string",
                        "description": "Exact version to install (default: latest)"
                    },
                    "env_dir": { "type": "string", "description": ENV_DIR_PROP }
                }),
                &["name"],
            ),
        },
        ToolDefinition {
            name: "freeze",
            description: "Installed packages as name==version lines, sorted by name.",
            input_schema: env_only_schema(),
        },
        ToolDefinition {
            name: "write_requirements",
            description: "Write the freeze output to a requirements file (default: \
                requirements.txt).",
            input_schema: schema(
                json!({
                    "path": { "type": "string" },
                    "env_dir": { "type": "string", "description": ENV_DIR_PROP }
                }),
                &[],
            ),
        },
        ToolDefinition {
            name: "execute_python",
            description: "Run Python source with the environment's interpreter. Returns stdout, \
                stderr, exit_code and timed_out.",
            input_schema: schema(
                json!({
                    "code": { "type": "string" },
                    "working_dir": {
                        "type": "string",
                        "description": "Working directory relative to the workspace"
                    },
                    "timeout": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Seconds (default: configured timeout)"
                    },
                    "env_dir": { "type": "string", "description": ENV_DIR_PROP }
                }),
                &["code"],
            ),
        },
        ToolDefinition {
            name: "run_command",
            description: "Run a program with arguments inside the environment; \"python\" and \
                \"pip\" map to the environment's executables. No shell is involved.",
            input_schema: schema(
                json!({
                    "command": { "type": "array", "items": { "type": "string" }, "minItems": 1 },
                    "working_dir": { "type": "string" },
                    "timeout": { "type": "integer", "minimum": 1 },
                    "env_dir": { "type": "string", "description": ENV_DIR_PROP }
                }),
                &["command"],
            ),
        },
    ]
}

pub(crate) fn execute_tool(toolbox: &Toolbox, name: &str, args: Value) -> ToolResult {
    match call(toolbox, name, args) {
        Ok(content) => ToolResult::ok(content),
        Err(e) => {
            tracing::debug!(tool = name, kind = e.kind(), error = %e, "Tool call failed");
            ToolResult::err(&e)
        }
    }
}

// ─── Arguments ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct ReadArgs {
    path: String,
    start_line: Option<usize>,
    end_line: Option<usize>,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
    #[serde(default)]
    append: bool,
}

#[derive(Deserialize)]
struct ListArgs {
    path: Option<String>,
}

#[derive(Deserialize)]
struct EnvArgs {
    env_dir: Option<String>,
}

#[derive(Deserialize)]
struct ManifestArgs {
    manifest: Option<String>,
    env_dir: Option<String>,
}

#[derive(Deserialize)]
struct InstallArgs {
    spec: String,
    env_dir: Option<String>,
}

#[derive(Deserialize)]
struct UpdateArgs {
    name: String,
    version: Option<String>,
    env_dir: Option<String>,
}

#[derive(Deserialize)]
struct RequirementsArgs {
    path: Option<String>,
    env_dir: Option<String>,
}

#[derive(Deserialize)]
struct ExecArgs {
    code: String,
    working_dir: Option<String>,
    timeout: Option<u64>,
    env_dir: Option<String>,
}

#[derive(Deserialize)]
struct CommandArgs {
    command: Vec<String>,
    working_dir: Option<String>,
    timeout: Option<u64>,
    env_dir: Option<String>,
}

/// `null` (no arguments) reads as `{}`.
fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|e| ToolboxError::invalid_input(format!("{}: invalid arguments: {}", tool, e)))
}

fn timeout_arg(timeout: Option<u64>) -> Result<Option<Duration>> {
    match timeout {
        Some(0) => Err(ToolboxError::invalid_input("timeout must be at least 1 second")),
        other => Ok(other.map(Duration::from_secs)),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| ToolboxError::invalid_input(format!("unserializable result: {}", e)))
}

// ─── Dispatch ───────────────────────────────────────────────────────────────

/// Route one tool call. Unknown names and malformed arguments are `InvalidInput`.
pub fn call(toolbox: &Toolbox, name: &str, args: Value) -> Result<Value> {
    tracing::debug!(tool = name, "Tool call");
    let locate =
        |env_dir: Option<&str>| -> Result<Environment> { toolbox.environments().locate(env_dir) };

    match name {
        "read_file" => {
            let a: ReadArgs = parse_args(name, args)?;
            let content = toolbox.files().read_file(&a.path, a.start_line, a.end_line)?;
            Ok(json!({ "path": a.path, "content": content }))
        }
        "write_file" => {
            let a: WriteArgs = parse_args(name, args)?;
            to_value(&toolbox.files().write_file(&a.path, &a.content, a.append)?)
        }
        "delete_file" => {
            let a: PathArgs = parse_args(name, args)?;
            let path = toolbox.files().delete_file(&a.path)?;
            Ok(json!({ "deleted": path }))
        }
        "list_directory" => {
            let a: ListArgs = parse_args(name, args)?;
            let path = a.path.unwrap_or_else(|| ".".to_string());
            let entries = toolbox.files().list_directory(&path)?;
            Ok(json!({ "path": path, "entries": to_value(&entries)? }))
        }
        "create_directory" => {
            let a: PathArgs = parse_args(name, args)?;
            let path = toolbox.files().create_directory(&a.path)?;
            Ok(json!({ "created": path }))
        }
        "create_venv" => {
            let a: EnvArgs = parse_args(name, args)?;
            toolbox.environments().create(a.env_dir.as_deref())?;
            to_value(&toolbox.environments().info(a.env_dir.as_deref())?)
        }
        "venv_info" => {
            let a: EnvArgs = parse_args(name, args)?;
            to_value(&toolbox.environments().info(a.env_dir.as_deref())?)
        }
        "install_dependencies" => {
            let a: ManifestArgs = parse_args(name, args)?;
            let env = locate(a.env_dir.as_deref())?;
            to_value(&toolbox.dependencies().install_from(&env, a.manifest.as_deref())?)
        }
        "install_package" => {
            let a: InstallArgs = parse_args(name, args)?;
            let spec = PackageSpec::parse(&a.spec)
                .map_err(|e| ToolboxError::invalid_input(e.to_string()))?;
            let env = locate(a.env_dir.as_deref())?;
            toolbox.dependencies().install_package(&env, &spec)?;
            Ok(json!({ "installed": spec.to_string() }))
        }
        "list_packages" => {
            let a: EnvArgs = parse_args(name, args)?;
            let env = locate(a.env_dir.as_deref())?;
            let mut packages = toolbox.dependencies().list_installed(&env)?;
            packages.sort_by_cached_key(|p| pytoolbox_deps::normalize_name(&p.name));
            Ok(json!({ "count": packages.len(), "packages": to_value(&packages)? }))
        }
        "check_conflicts" => {
            let a: EnvArgs = parse_args(name, args)?;
            let report = toolbox.dependencies().check_conflicts(&locate(a.env_dir.as_deref())?)?;
            Ok(json!({ "ok": report.is_empty(), "conflicts": to_value(&report.conflicts)? }))
        }
        "update_package" => {
            let a: UpdateArgs = parse_args(name, args)?;
            let env = locate(a.env_dir.as_deref())?;
            to_value(&toolbox.dependencies().update(&env, &a.name, a.version.as_deref())?)
        }
        "freeze" => {
            let a: EnvArgs = parse_args(name, args)?;
            let text = toolbox.dependencies().freeze(&locate(a.env_dir.as_deref())?)?;
            Ok(json!({ "requirements": text }))
        }
        "write_requirements" => {
            let a: RequirementsArgs = parse_args(name, args)?;
            let env = locate(a.env_dir.as_deref())?;
            let path = toolbox.dependencies().write_requirements(&env, a.path.as_deref())?;
            Ok(json!({ "path": path }))
        }
        "execute_python" => {
            let a: ExecArgs = parse_args(name, args)?;
            let timeout = timeout_arg(a.timeout)?;
            let env = locate(a.env_dir.as_deref())?;
            let result = toolbox
                .executor()
                .run(&env, &Payload::Code(a.code), a.working_dir.as_deref(), timeout)?;
            to_value(&result)
        }
        "run_command" => {
            let a: CommandArgs = parse_args(name, args)?;
            let timeout = timeout_arg(a.timeout)?;
            let env = locate(a.env_dir.as_deref())?;
            let result = toolbox
                .executor()
                .run(&env, &Payload::Command(a.command), a.working_dir.as_deref(), timeout)?;
            to_value(&result)
        }
        _ => Err(ToolboxError::invalid_input(format!("unknown tool: {}", name))),
    }
}

#[cfg(test)]
mod tests;
