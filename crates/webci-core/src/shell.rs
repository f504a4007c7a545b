//! Blocking subprocess execution with output capture and an optional timeout.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Output kept per step; the tail is what matters when a build fails.
pub const MAX_OUTPUT: usize = 10 * 1024;

// ---------------------------------------------------------------------------
// StepEnv
// ---------------------------------------------------------------------------

/// Environment shared by every step of a run. Runtime setup prepends the
/// selected toolchain here so later steps resolve it first.
#[derive(Debug, Clone, Default)]
pub struct StepEnv {
    path_prefix: Vec<PathBuf>,
    vars: BTreeMap<String, String>,
}

impl StepEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepend_path(&mut self, dir: impl Into<PathBuf>) {
        self.path_prefix.insert(0, dir.into());
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn path_prefix(&self) -> &[PathBuf] {
        &self.path_prefix
    }

    /// `PATH` as the step will see it: toolchain dirs first, then the
    /// ambient search path.
    pub fn search_path(&self) -> Option<OsString> {
        let ambient = std::env::var_os("PATH").unwrap_or_default();
        let dirs = self
            .path_prefix
            .iter()
            .cloned()
            .chain(std::env::split_paths(&ambient));
        std::env::join_paths(dirs).ok()
    }

    pub fn apply(&self, cmd: &mut Command) {
        if let Some(path) = self.search_path() {
            cmd.env("PATH", path);
        }
        cmd.envs(&self.vars);
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    /// `None` when the process never started, timed out or was killed by a
    /// signal.
    pub exit_code: Option<i32>,
    pub output: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// A step that completed without spawning a process.
    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            output: output.into(),
            timed_out: false,
        }
    }

    /// A step refused before any process was started.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::failed(reason.into())
    }

    fn failed(output: String) -> Self {
        Self {
            exit_code: None,
            output,
            timed_out: false,
        }
    }
}

/// Build `sh -c <command>` in `cwd` with the run environment applied.
pub fn shell_command(command: &str, cwd: &Path, env: &StepEnv) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(cwd);
    env.apply(&mut cmd);
    cmd
}

/// Run `cmd` to completion with an optional timeout. `None` waits forever.
///
/// stdout and stderr are drained on reader threads. With a timeout the wait
/// runs on a waiter thread and the process is killed if it has not exited.
pub fn execute(mut cmd: Command, timeout: Option<Duration>) -> CommandOutput {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Own process group, so a timeout also reaches anything the step forked.
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return CommandOutput::failed(format!("failed to spawn: {e}")),
    };

    let child_pid = child.id();

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> String {
        let mut buf = String::new();
        if let Some(mut r) = stdout_handle {
            let _ = r.read_to_string(&mut buf);
        }
        buf
    });
    let stderr_thread = std::thread::spawn(move || -> String {
        let mut buf = String::new();
        if let Some(mut r) = stderr_handle {
            let _ = r.read_to_string(&mut buf);
        }
        buf
    });

    let wait_result = match timeout {
        None => child.wait(),
        Some(timeout_dur) => {
            let (tx, rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let _ = tx.send(child.wait());
            });

            match rx.recv_timeout(timeout_dur) {
                Ok(result) => result,
                Err(_) => {
                    // Reader threads see EOF once the killed group exits.
                    kill_process_group(child_pid);
                    return CommandOutput {
                        exit_code: None,
                        output: format!("timed out after {}s", timeout_dur.as_secs_f32()),
                        timed_out: true,
                    };
                }
            }
        }
    };

    let stdout_buf = stdout_thread.join().unwrap_or_default();
    let stderr_buf = stderr_thread.join().unwrap_or_default();

    match wait_result {
        Ok(status) => CommandOutput {
            exit_code: status.code(),
            output: combine_output(&stdout_buf, &stderr_buf),
            timed_out: false,
        },
        Err(e) => CommandOutput::failed(format!("wait failed: {e}")),
    }
}

/// Combine stdout/stderr and cap to [`MAX_OUTPUT`] (keeping the tail).
fn combine_output(stdout: &str, stderr: &str) -> String {
    let output = if stderr.is_empty() {
        stdout.to_string()
    } else if stdout.is_empty() {
        stderr.to_string()
    } else {
        format!("{stdout}\n{stderr}")
    };
    crate::io::tail(output.trim(), MAX_OUTPUT).to_string()
}

/// SIGKILL the process group led by `pid`. Best-effort; errors are ignored.
fn kill_process_group(pid: u32) {
    let _ = Command::new("kill")
        .args(["-9", "--", &format!("-{pid}")])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}
