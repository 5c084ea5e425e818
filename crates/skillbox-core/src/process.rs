//! Bounded child-process execution shared by the runtime, the validator, and
//! process-backed skills.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{Result, SkillboxError};

/// Upper bound on captured output quoted back in diagnostics.
pub const DIAGNOSTIC_LIMIT: usize = 1000;
/// Upper bound on a failed child's stderr quoted in a skill failure message.
pub const STDERR_EXCERPT: usize = 400;

/// Exit details of a child that ran to completion.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; `None` when the child was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Exited(ProcessOutput),
    /// The wall-clock bound elapsed and the child's process group was killed.
    TimedOut { after: Duration },
}

/// Spawn `cmd`, feed it `stdin`, and wait at most `timeout` for it to exit.
///
/// The child is placed in its own process group; on timeout the whole group
/// is killed so grandchildren cannot outlive it. Spawn failures are errors,
/// everything else is reported through [`ProcessOutcome`].
pub async fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<ProcessOutcome> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| SkillboxError::Spawn {
        program: program.clone(),
        reason: e.to_string(),
    })?;
    let pid = child.id();
    debug!(program = %program, ?pid, timeout_secs = timeout.as_secs_f32(), "spawned child process");

    let input = stdin.map(<[u8]>::to_vec);
    let mut pipe = child.stdin.take();
    let run = async move {
        if let (Some(bytes), Some(mut pipe)) = (input, pipe.take()) {
            // A child that exits without reading its input is not an error here.
            if let Err(e) = pipe.write_all(&bytes).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e);
                }
            }
        }
        child.wait_with_output().await
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok(output)) => Ok(ProcessOutcome::Exited(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            warn!(program = %program, ?pid, "child process timed out, killing process group");
            if let Some(pid) = pid {
                kill_group(pid);
            }
            Ok(ProcessOutcome::TimedOut { after: timeout })
        }
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    // The child leads its own group (process_group(0)), so pgid == pid.
    unsafe {
        libc::killpg(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

/// First `max` bytes of `s`, cut on a char boundary, with an ellipsis when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

/// Last `max` bytes of `s`, cut on a char boundary, with an ellipsis when cut.
pub fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &s[start..])
}
