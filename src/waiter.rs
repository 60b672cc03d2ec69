//! Polling for artifacts written by the measurement binary.

// Copyright (c) 2025 Jak Bracegirdle
//
// This file is part of the speedtest_exporter crate.
//
// Licensed under the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::path::Path;
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, SpeedtestError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Waiting,
    Ready,
    TimedOut,
    Cancelled,
}

/// Waits for a file to exist with a non-zero size.
///
/// Readiness only means "non-empty": the writer may still be flushing, so a
/// decode failure right after a successful wait is the reader's problem.
#[derive(Debug, Clone)]
pub struct ResultFileWaiter {
    initial_interval: Duration,
    step: Duration,
    max_interval: Duration,
}

impl Default for ResultFileWaiter {
    fn default() -> Self {
        ResultFileWaiter {
            initial_interval: Duration::from_millis(100),
            step: Duration::from_millis(100),
            max_interval: Duration::from_secs(1),
        }
    }
}

impl ResultFileWaiter {
    /// Polls every `initial`, growing by `step` up to `max`.
    pub fn with_backoff(initial: Duration, step: Duration, max: Duration) -> Self {
        ResultFileWaiter {
            initial_interval: initial,
            step,
            max_interval: max.max(initial),
        }
    }

    /// Polls `path` until it is ready, `deadline` passes or `cancel` fires,
    /// and returns the terminal state.
    pub async fn wait_for(&self, path: &Path, deadline: Instant, cancel: &CancellationToken) -> WaitState {
        let mut state = WaitState::Waiting;
        let mut interval = self.initial_interval;

        while state == WaitState::Waiting {
            state = if cancel.is_cancelled() {
                WaitState::Cancelled
            } else if is_ready(path).await {
                WaitState::Ready
            } else if Instant::now() >= deadline {
                WaitState::TimedOut
            } else {
                let nap = interval.min(deadline.saturating_duration_since(Instant::now()));
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = time::sleep(nap) => {}
                }
                interval = (interval + self.step).min(self.max_interval);
                WaitState::Waiting
            };
        }

        debug!(file = %path.display(), ?state, "finished waiting");
        state
    }

    /// Like [`wait_for`](Self::wait_for), as a `Result`.
    pub async fn wait(&self, path: &Path, deadline: Instant, cancel: &CancellationToken) -> Result<()> {
        match self.wait_for(path, deadline, cancel).await {
            WaitState::Ready => Ok(()),
            WaitState::Cancelled => Err(SpeedtestError::Cancelled(format!(
                "stopped waiting for {}",
                path.display()
            ))),
            WaitState::TimedOut | WaitState::Waiting => Err(SpeedtestError::Timeout(format!(
                "file {} did not appear in time",
                path.display()
            ))),
        }
    }
}

async fn is_ready(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}
