//! Observability: tracing init, audit log, security events.
//!
//! Uses config::ObservabilityConfig for PYTOOLBOX_QUIET, LOG_LEVEL, AUDIT_LOG, etc.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

static AUDIT_PATH: Mutex<Option<String>> = Mutex::new(None);
static SECURITY_EVENTS_PATH: Mutex<Option<String>> = Mutex::new(None);

/// Initialize tracing. Call at process startup.
/// When PYTOOLBOX_QUIET=1, only WARN and above are logged.
pub fn init_tracing() {
    let cfg = crate::config::ObservabilityConfig::from_env();
    let level = if cfg.quiet {
        "pytoolbox=warn".to_string()
    } else {
        cfg.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    // Logs go to stderr so tool output on stdout stays machine-readable.
    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}

fn cached_path(slot: &Mutex<Option<String>>, configured: Option<&String>) -> Option<String> {
    {
        let guard = slot.lock().ok()?;
        if let Some(ref p) = *guard {
            return Some(p.clone());
        }
    }
    let path = configured?.clone();
    if path.is_empty() {
        return None;
    }
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    {
        let mut guard = slot.lock().ok()?;
        *guard = Some(path.clone());
    }
    Some(path)
}

fn get_audit_path() -> Option<String> {
    let cfg = crate::config::ObservabilityConfig::from_env();
    cached_path(&AUDIT_PATH, cfg.audit_log.as_ref())
}

fn get_security_events_path() -> Option<String> {
    let cfg = crate::config::ObservabilityConfig::from_env();
    cached_path(&SECURITY_EVENTS_PATH, cfg.security_events_log.as_ref())
}

fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Audit: execution_started (right before spawn)
pub fn audit_execution_started(operation: &str, cmd: &str, args: &[String], cwd: &str) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now(),
            "event": "execution_started",
            "operation": operation,
            "cmd": cmd,
            "args": args,
            "cwd": cwd,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: execution_completed
pub fn audit_execution_completed(
    operation: &str,
    exit_code: i32,
    timed_out: bool,
    duration_ms: u64,
    stdout_len: usize,
) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now(),
            "event": "execution_completed",
            "operation": operation,
            "exit_code": exit_code,
            "timed_out": timed_out,
            "duration_ms": duration_ms,
            "stdout_len": stdout_len,
            "success": exit_code == 0 && !timed_out,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: one package-manager install, successful or not
pub fn audit_package_install(env_dir: &str, spec: &str, success: bool) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now(),
            "event": "package_install",
            "env": env_dir,
            "spec": spec,
            "success": success,
        });
        append_jsonl(&path, &record);
    }
}

/// Security event: a path argument tried to leave the workspace
pub fn security_path_violation(requested: &str, resolved: &str, root: &str) {
    tracing::warn!(
        requested = %requested,
        resolved = %resolved,
        root = %root,
        "Security: path escapes workspace"
    );
    if let Some(path) = get_security_events_path() {
        let record = json!({
            "ts": now(),
            "type": "path_violation",
            "category": "filesystem",
            "details": {
                "requested": requested,
                "resolved": resolved,
                "root": root
            }
        });
        append_jsonl(&path, &record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_jsonl_writes_one_line_per_record() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.jsonl");
        let path_str = path.to_string_lossy().to_string();
        append_jsonl(&path_str, &json!({"event": "a"}));
        append_jsonl(&path_str, &json!({"event": "b"}));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "b");
    }

    #[test]
    fn test_cached_path_creates_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("logs").join("sec.jsonl");
        let slot = Mutex::new(None);
        let configured = target.to_string_lossy().to_string();
        let got = cached_path(&slot, Some(&configured));
        assert_eq!(got.as_deref(), Some(configured.as_str()));
        assert!(tmp.path().join("logs").is_dir());
        // Second call is served from the slot even without configuration.
        assert_eq!(cached_path(&slot, None).as_deref(), Some(configured.as_str()));
    }
}
