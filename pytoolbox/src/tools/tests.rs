//! Tests for tool definitions and dispatch.

use super::*;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use pytoolbox_core::config::ToolboxConfig;
use pytoolbox_sandbox::{CommandRunner, CommandSpec, ExecutionResult};

/// Stands in for python and pip: `-m venv` lays out a fake environment,
/// `-c` answers the metadata query with `installed`, everything else succeeds.
struct FakePython {
    installed: Value,
    calls: Mutex<Vec<Vec<String>>>,
}

impl CommandRunner for FakePython {
    fn run(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let args = spec.args_lossy();
        self.calls.lock().unwrap().push(args.clone());
        let stdout = match args.first().map(String::as_str) {
            Some("-m") if args.get(1).map(String::as_str) == Some("venv") => {
                let bin = PathBuf::from(args.last().unwrap()).join("bin");
                std::fs::create_dir_all(&bin).unwrap();
                std::fs::write(bin.join("python"), "").unwrap();
                std::fs::write(bin.join("pip"), "").unwrap();
                String::new()
            }
            Some("-c") => self.installed.to_string(),
            Some("--version") => "Python 3.12.2\n".to_string(),
            _ => "ok\n".to_string(),
        };
        Ok(ExecutionResult {
            stdout,
            ..Default::default()
        })
    }
}

fn toolbox_with(installed: Value) -> (tempfile::TempDir, Toolbox, Arc<FakePython>) {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("base-python3");
    std::fs::write(&base, "").unwrap();
    let ws = tmp.path().join("ws");
    std::fs::create_dir_all(&ws).unwrap();

    let mut config = ToolboxConfig::for_workspace(&ws);
    config.base_python = Some(base);
    let runner = Arc::new(FakePython {
        installed,
        calls: Mutex::new(Vec::new()),
    });
    let toolbox = Toolbox::with_runner(config, runner.clone()).unwrap();
    (tmp, toolbox, runner)
}

fn toolbox() -> (tempfile::TempDir, Toolbox) {
    let (tmp, tb, _) = toolbox_with(json!([]));
    (tmp, tb)
}

fn error_kind(result: &ToolResult) -> &str {
    assert!(result.is_error, "expected error, got {}", result.content);
    result.content["error"]["kind"].as_str().unwrap()
}

#[test]
fn test_definitions_cover_every_tool() {
    let defs = tool_definitions();
    let names: Vec<_> = defs.iter().map(|d| d.name).collect();
    assert_eq!(names.len(), 16);
    for expected in [
        "read_file",
        "write_file",
        "delete_file",
        "list_directory",
        "create_directory",
        "create_venv",
        "venv_info",
        "install_dependencies",
        "install_package",
        "list_packages",
        "check_conflicts",
        "update_package",
        "freeze",
        "write_requirements",
        "execute_python",
        "run_command",
    ] {
        assert!(names.contains(&expected), "missing {}", expected);
    }
    for def in &defs {
        assert_eq!(def.input_schema["type"], "object");
        let rendered = serde_json::to_value(def).unwrap();
        assert!(rendered.get("inputSchema").is_some());
    }
}

#[test]
fn test_file_tools_roundtrip() {
    let (_tmp, tb) = toolbox();

    let r = tb.execute_tool("write_file", json!({ "path": "src/app.py", "content": "a\nb\nc\n" }));
    assert!(!r.is_error, "{}", r.content);
    assert_eq!(r.content["bytes"], 6);

    let r = tb.execute_tool(
        "read_file",
        json!({ "path": "src/app.py", "start_line": 2, "end_line": 3 }),
    );
    assert_eq!(r.content["content"], "b\nc\n");

    let r = tb.execute_tool("list_directory", json!({ "path": "src" }));
    assert_eq!(r.content["entries"][0]["name"], "app.py");
    assert_eq!(r.content["entries"][0]["type"], "file");

    let r = tb.execute_tool("create_directory", json!({ "path": "data/raw" }));
    assert_eq!(r.content["created"], "data/raw");

    let r = tb.execute_tool("delete_file", json!({ "path": "src/app.py" }));
    assert!(!r.is_error);
    let r = tb.execute_tool("read_file", json!({ "path": "src/app.py" }));
    assert_eq!(error_kind(&r), "not_found");
}

#[test]
fn test_list_directory_defaults_to_root() {
    let (_tmp, tb) = toolbox();
    tb.execute_tool("write_file", json!({ "path": "x.txt", "content": "" }));
    let r = tb.execute_tool("list_directory", Value::Null);
    assert!(!r.is_error, "{}", r.content);
    assert_eq!(r.content["path"], ".");
}

#[test]
fn test_errors_are_structured() {
    let (_tmp, tb) = toolbox();

    let r = tb.execute_tool("read_file", json!({ "path": "../../etc/passwd" }));
    assert_eq!(error_kind(&r), "path_violation");
    assert!(r.content["error"]["root"].is_string());

    assert_eq!(error_kind(&tb.execute_tool("nope", json!({}))), "invalid_input");
    assert_eq!(error_kind(&tb.execute_tool("write_file", json!({ "path": 1 }))), "invalid_input");
    assert_eq!(
        error_kind(&tb.execute_tool("install_package", json!({ "spec": ">=1" }))),
        "invalid_input"
    );
}

#[test]
fn test_env_tools_require_environment() {
    let (_tmp, tb) = toolbox();
    let r = tb.execute_tool("freeze", json!({}));
    assert_eq!(error_kind(&r), "environment_not_found");
    let r = tb.execute_tool("execute_python", json!({ "code": "print(1)" }));
    assert_eq!(error_kind(&r), "environment_not_found");
}

#[test]
fn test_create_venv_then_packages() {
    let installed = json!([
        { "name": "A", "version": "1.0", "requires": ["B>=2.0"] },
        { "name": "B", "version": "1.0", "requires": [] },
        { "name": "pip", "version": "24.0", "requires": [] }
    ]);
    let (_tmp, tb, runner) = toolbox_with(installed);

    let r = tb.execute_tool("create_venv", json!({}));
    assert!(!r.is_error, "{}", r.content);
    assert_eq!(r.content["path"], ".venv");
    assert_eq!(r.content["python_version"], "3.12.2");

    let r = tb.execute_tool("check_conflicts", json!({}));
    assert_eq!(r.content["ok"], false);
    assert_eq!(r.content["conflicts"][0]["package"], "A");
    assert_eq!(r.content["conflicts"][0]["requirement"], "B>=2.0");
    assert_eq!(r.content["conflicts"][0]["installed_version"], "1.0");

    let r = tb.execute_tool("freeze", json!({}));
    assert_eq!(r.content["requirements"], "A==1.0\nB==1.0\npip==24.0\n");

    let r = tb.execute_tool("list_packages", json!({}));
    assert_eq!(r.content["count"], 3);

    let r = tb.execute_tool("install_package", json!({ "spec": "requests>=2.31" }));
    assert!(!r.is_error, "{}", r.content);
    assert_eq!(r.content["installed"], "requests>=2.31");
    let calls = runner.calls.lock().unwrap();
    assert!(calls.iter().any(|c| c.last().map(String::as_str) == Some("requests>=2.31")));
}

#[test]
fn test_write_requirements_then_install() {
    let installed = json!([{ "name": "six", "version": "1.16.0", "requires": [] }]);
    let (_tmp, tb, _) = toolbox_with(installed);
    tb.execute_tool("create_venv", json!({}));

    let r = tb.execute_tool("write_requirements", json!({}));
    assert_eq!(r.content["path"], "requirements.txt");

    let r = tb.execute_tool("install_dependencies", json!({}));
    assert!(!r.is_error, "{}", r.content);
    assert_eq!(r.content["installed"], json!(["six==1.16.0"]));
}

#[test]
fn test_execution_tools() {
    let (_tmp, tb) = toolbox();
    tb.execute_tool("create_venv", json!({}));

    let r = tb.execute_tool("execute_python", json!({ "code": "print('ok')", "timeout": 0 }));
    assert_eq!(error_kind(&r), "invalid_input");

    let r = tb.execute_tool("run_command", json!({ "command": ["python", "-V"] }));
    assert!(!r.is_error, "{}", r.content);
    assert_eq!(r.content["exit_code"], 0);
    assert_eq!(r.content["stdout"], "ok\n");
    assert!(r.content.get("kill_reason").is_none());

    let r = tb.execute_tool("run_command", json!({ "command": ["python"], "working_dir": "../" }));
    assert_eq!(error_kind(&r), "path_violation");
}
