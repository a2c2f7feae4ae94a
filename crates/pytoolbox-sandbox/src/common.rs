//! Process monitoring shared by every subprocess: bounded wait, output pumps,
//! memory polling, and process-tree kill.

use std::io::{self, Read};
use std::process::Child;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::runner::KillReason;

/// Poll interval for exit / memory checks, in milliseconds
pub const POLL_INTERVAL_MS: u64 = 20;

/// How long to wait for the output pumps after the process is gone.
///
/// Grandchildren that inherited the pipes can keep them open after the
/// direct child dies; past this bound the pumps are abandoned.
pub const OUTPUT_GRACE_MS: u64 = 2_000;

/// Get memory usage of a process in bytes (Linux version)
/// Uses /proc/<pid>/status to read VmRSS
#[cfg(target_os = "linux")]
pub fn get_process_memory(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb = line.split_whitespace().nth(1)?.parse::<u64>().ok()?;
    Some(kb * 1024)
}

/// Get memory usage of a process in bytes (macOS version, via `ps -o rss=`)
#[cfg(target_os = "macos")]
pub fn get_process_memory(pid: u32) -> Option<u64> {
    let output = std::process::Command::new("ps")
        .args(["-o", "rss=", "-p", &pid.to_string()])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let kb = String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse::<u64>()
        .ok()?;
    Some(kb * 1024)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn get_process_memory(_pid: u32) -> Option<u64> {
    None
}

/// What [`wait_with_limits`] observed.
#[derive(Debug)]
pub struct WaitOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub kill_reason: Option<KillReason>,
}

/// Background reader for one child pipe.
///
/// Bytes land in a shared buffer as they arrive so a caller that gives up
/// waiting still gets everything read so far.
struct Pump {
    buf: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
}

impl Pump {
    fn spawn<R: Read + Send + 'static>(mut src: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let (tx, done) = mpsc::channel();
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match src.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Ok(mut b) = sink.lock() {
                            b.extend_from_slice(&chunk[..n]);
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            let _ = tx.send(());
        });
        Self { buf, done }
    }

    /// Wait for EOF until `deadline`, then decode whatever was collected (lossy UTF-8).
    fn finish(self, deadline: Instant) -> String {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if self.done.recv_timeout(remaining).is_err() {
            tracing::debug!("Output pipe still open after grace period; abandoning reader");
        }
        let bytes = self.buf.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn finish_pumps(stdout: Option<Pump>, stderr: Option<Pump>) -> (String, String) {
    let deadline = Instant::now() + Duration::from_millis(OUTPUT_GRACE_MS);
    let out = stdout.map(|p| p.finish(deadline)).unwrap_or_default();
    let err = stderr.map(|p| p.finish(deadline)).unwrap_or_default();
    (out, err)
}

/// Kill the child and, on Unix, its whole process group.
///
/// Relies on the child having been started with `process_group(0)`.
pub fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Ok(pgid) = i32::try_from(child.id()) {
            if killpg(Pid::from_raw(pgid), Signal::SIGKILL).is_ok() {
                let _ = child.wait();
                return;
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Wait for `child` while enforcing a wall-clock timeout and optional RSS ceiling.
///
/// stdout/stderr are drained by background threads while the process runs;
/// without that a child writing more than a pipe buffer would block forever.
/// A killed process reports exit code `-1` and the matching [`KillReason`];
/// output produced before the kill is kept.
pub fn wait_with_limits(
    child: &mut Child,
    timeout: Duration,
    memory_limit_bytes: Option<u64>,
) -> io::Result<WaitOutcome> {
    let start = Instant::now();
    let interval = Duration::from_millis(POLL_INTERVAL_MS);

    let stdout = child.stdout.take().map(Pump::spawn);
    let stderr = child.stderr.take().map(Pump::spawn);

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let (stdout, stderr) = finish_pumps(stdout, stderr);
                return Ok(WaitOutcome {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                    kill_reason: None,
                });
            }
            Ok(None) => {}
            Err(e) => {
                kill_tree(child);
                let _ = finish_pumps(stdout, stderr);
                return Err(e);
            }
        }

        if start.elapsed() >= timeout {
            kill_tree(child);
            let (stdout, mut stderr) = finish_pumps(stdout, stderr);
            push_note(
                &mut stderr,
                &format!(
                    "Process killed: exceeded timeout of {:.1} seconds",
                    timeout.as_secs_f64()
                ),
            );
            return Ok(WaitOutcome {
                stdout,
                stderr,
                exit_code: -1,
                kill_reason: Some(KillReason::Timeout),
            });
        }

        if let Some(limit) = memory_limit_bytes {
            if let Some(used) = get_process_memory(child.id()) {
                if used > limit {
                    kill_tree(child);
                    let (stdout, mut stderr) = finish_pumps(stdout, stderr);
                    push_note(
                        &mut stderr,
                        &format!(
                            "Process killed: memory usage ({} MB) exceeded limit ({} MB)",
                            used / (1024 * 1024),
                            limit / (1024 * 1024)
                        ),
                    );
                    return Ok(WaitOutcome {
                        stdout,
                        stderr,
                        exit_code: -1,
                        kill_reason: Some(KillReason::MemoryLimit),
                    });
                }
            }
        }

        thread::sleep(interval);
    }
}

fn push_note(stderr: &mut String, note: &str) {
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str(note);
    stderr.push('\n');
}
