//! Supervised execution of the external formatter.
//!
//! The child runs in its own process group so that a timeout can take down
//! everything it spawned. Both output pipes are drained on background
//! threads from the moment the child starts; otherwise a chatty tool could
//! fill a pipe buffer and never exit.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::error::FormatError;

/// Captured result of one formatter run.
#[derive(Debug)]
pub struct ProcessOutput {
    /// `None` when the run was killed on timeout.
    pub status: Option<ExitStatus>,
    /// Decoded standard output.
    pub stdout: String,
    /// Decoded standard error.
    pub stderr: String,
    /// Wall time until exit or kill.
    pub elapsed: Duration,
}

impl ProcessOutput {
    /// The run was killed on timeout.
    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }
}

/// Run `command` to completion or until `timeout` elapses.
///
/// # Errors
///
/// Returns [`FormatError::Spawn`] when the process cannot be started and
/// [`FormatError::Io`] when waiting on it fails.
pub fn run(mut command: Command, timeout: Duration) -> Result<ProcessOutput, FormatError> {
    let program = command.get_program().to_string_lossy().into_owned();
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let started = Instant::now();
    let mut child = command
        .spawn()
        .map_err(|source| FormatError::Spawn { program, source })?;
    debug!(pid = child.id(), "formatter started");

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => Some(status),
        Ok(None) => {
            warn!(pid = child.id(), ?timeout, "formatter timed out; killing process tree");
            reap(&mut child)?;
            None
        }
        Err(e) => {
            warn!(pid = child.id(), error = %e, "waiting on formatter failed; killing process tree");
            if let Err(reap_error) = reap(&mut child) {
                debug!(error = %reap_error, "formatter could not be reaped");
            }
            // The drain threads finish once the group has released the pipes.
            collect(stdout);
            collect(stderr);
            return Err(e.into());
        }
    };

    Ok(ProcessOutput {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
        elapsed: started.elapsed(),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!(error = %e, "formatter pipe closed early");
        }
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Kill the child's process tree and wait for the child itself.
fn reap(child: &mut Child) -> std::io::Result<ExitStatus> {
    kill_tree(child);
    child.wait()
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_tree(child: &mut Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    // SAFETY: kill(2) takes plain integers; the group was created at spawn.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        let _ = child.kill();
    }
}

#[cfg(windows)]
fn kill_tree(child: &mut Child) {
    let killed = Command::new("taskkill")
        .args(["/T", "/F", "/PID", &child.id().to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success());
    if !killed {
        let _ = child.kill();
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

/// The last `n` non-empty lines of `text`.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
