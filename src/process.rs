//! Running the measurement binary under a deadline.
//!
//! `qms_lib` is known to abort (SIGABRT, or exit status 134 when run through
//! a shell) after it has already written its output when it is not attached
//! to a TTY. Those terminations are tolerated: every other non-zero exit is
//! an [`ExecutionFailed`](SpeedtestError::ExecutionFailed).

// Copyright (c) 2025 Jak Bracegirdle
//
// This file is part of the speedtest_exporter crate.
//
// Licensed under the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Result, SpeedtestError};

/// Termination descriptions that count as a successful run.
///
/// Matched case-sensitively as substrings of [`describe_exit`]'s output,
/// never against anything the process printed.
pub const TOLERATED_ABORTS: &[&str] = &[
    "signal: aborted",
    "signal: abort",
    "exit status 134",
    "SIGABRT",
];

/// How long to keep draining stderr once the process is gone.
const STDERR_GRACE: Duration = Duration::from_millis(500);
/// Bytes of stderr kept for error messages. Older output is discarded.
const STDERR_LIMIT: usize = 64 * 1024;

/// How a run that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    ToleratedAbort { reason: String },
}

enum Waited {
    Exited(io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

/// Spawns one binary and waits for it to exit.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    tolerated: &'static [&'static str],
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ProcessRunner {
            program: program.into(),
            tolerated: TOLERATED_ABORTS,
        }
    }

    /// Replaces the tolerated termination patterns.
    pub fn with_tolerated(mut self, patterns: &'static [&'static str]) -> Self {
        self.tolerated = patterns;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// True when `reason` matches one of this runner's tolerated patterns.
    pub fn is_tolerated(&self, reason: &str) -> bool {
        self.tolerated.iter().any(|pattern| reason.contains(pattern))
    }

    /// Runs the program with `args` until it exits, `deadline` passes or
    /// `cancel` fires. On deadline or cancellation the child is killed and
    /// reaped before the error is returned.
    pub async fn run(
        &self,
        args: &[String],
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        if cancel.is_cancelled() {
            return Err(SpeedtestError::Cancelled(format!(
                "{} was not started",
                self.program.display()
            )));
        }
        if Instant::now() >= deadline {
            return Err(SpeedtestError::Timeout(format!(
                "no time left to start {}",
                self.program.display()
            )));
        }

        debug!(binary = %self.program.display(), ?args, "spawning");

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!(binary = %self.program.display(), error = %e, "failed to spawn");
                SpeedtestError::ExecutionFailed(format!(
                    "failed to start {}: {e}",
                    self.program.display()
                ))
            })?;

        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(stderr_tail(stderr)));

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = cancel.cancelled() => Waited::Cancelled,
            _ = time::sleep_until(deadline) => Waited::TimedOut,
        };

        let status = match waited {
            Waited::Exited(status) => status.map_err(|e| {
                SpeedtestError::ExecutionFailed(format!(
                    "failed waiting for {}: {e}",
                    self.program.display()
                ))
            })?,
            Waited::Cancelled => {
                terminate(&mut child, &self.program).await;
                return Err(SpeedtestError::Cancelled(format!(
                    "{} was killed after cancellation",
                    self.program.display()
                )));
            }
            Waited::TimedOut => {
                terminate(&mut child, &self.program).await;
                return Err(SpeedtestError::Timeout(format!(
                    "{} did not finish before the deadline",
                    self.program.display()
                )));
            }
        };

        if status.success() {
            return Ok(RunOutcome::Completed);
        }

        let reason = describe_exit(status);
        if self.is_tolerated(&reason) {
            debug!(%reason, "abort after output, expected without a TTY");
            return Ok(RunOutcome::ToleratedAbort { reason });
        }

        let stderr = match stderr_task {
            Some(task) => match time::timeout(STDERR_GRACE, task).await {
                Ok(Ok(text)) => text,
                _ => String::new(),
            },
            None => String::new(),
        };
        let message = match stderr.lines().rev().find(|line| !line.trim().is_empty()) {
            Some(last) => format!("{reason}: {}", last.trim()),
            None => reason,
        };
        error!(binary = %self.program.display(), %message, "run failed");
        Err(SpeedtestError::ExecutionFailed(message))
    }
}

/// Reads `stderr` until the child closes it, keeping only the last
/// [`STDERR_LIMIT`] bytes. The pipe stays open for the whole run so a chatty
/// child never hits SIGPIPE.
async fn stderr_tail(mut stderr: ChildStderr) -> String {
    let mut tail = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > STDERR_LIMIT {
                    let excess = tail.len() - STDERR_LIMIT;
                    tail.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}

async fn terminate(child: &mut Child, program: &Path) {
    if let Err(e) = child.kill().await {
        warn!(binary = %program.display(), error = %e, "failed to kill child");
    }
}

/// Describes how a process ended, e.g. `exit status 2` or
/// `signal: aborted (SIGABRT)`.
pub fn describe_exit(status: ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return describe_signal(signal);
        }
    }
    match status.code() {
        Some(code) => format!("exit status {code}"),
        None => "terminated without an exit status".to_string(),
    }
}

#[cfg(unix)]
fn describe_signal(signal: i32) -> String {
    let name = match signal {
        1 => Some(("hangup", "SIGHUP")),
        2 => Some(("interrupt", "SIGINT")),
        6 => Some(("aborted", "SIGABRT")),
        9 => Some(("killed", "SIGKILL")),
        11 => Some(("segmentation fault", "SIGSEGV")),
        13 => Some(("broken pipe", "SIGPIPE")),
        15 => Some(("terminated", "SIGTERM")),
        _ => None,
    };
    match name {
        Some((text, sig)) => format!("signal: {text} ({sig})"),
        None => format!("signal: {signal}"),
    }
}
