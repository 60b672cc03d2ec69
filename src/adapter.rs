//! Adapter around the `qms_lib` command-line contract.
//!
//! | mode | arguments | artifact |
//! |---|---|---|
//! | list servers | `-L` | JSON array at the fixed server-data path |
//! | run test | `[-S <id>] -O <path> -F json` | JSON object at `<path>` |

// Copyright (c) 2025 Jak Bracegirdle
//
// This file is part of the speedtest_exporter crate.
//
// Licensed under the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, SpeedtestError};
use crate::logging::short_id;
use crate::models::{Artifact, Server, SpeedtestResult};
use crate::process::{ProcessRunner, RunOutcome};
use crate::waiter::{ResultFileWaiter, WaitState};

/// Operations the service needs from the measurement tool.
///
/// Allows swapping the real binary for a mock in tests.
#[async_trait]
pub trait SpeedtestAdapter: Send + Sync {
    /// Lists measurement servers in the order the tool produced them.
    async fn fetch_servers(&self, cancel: &CancellationToken) -> Result<Artifact<Vec<Server>>>;

    /// Runs one measurement, optionally against a specific server.
    async fn run_speedtest(
        &self,
        cancel: &CancellationToken,
        server_id: Option<u32>,
    ) -> Result<Artifact<SpeedtestResult>>;

    /// Deletes an artifact returned earlier. Failures are logged, not returned.
    async fn remove_artifact(&self, path: &Path);
}

/// [`SpeedtestAdapter`] backed by the real `qms_lib` executable.
pub struct QmsClient {
    runner: ProcessRunner,
    waiter: ResultFileWaiter,
    server_data_path: PathBuf,
    test_result_path: PathBuf,
    exec_timeout: Duration,
    file_wait_timeout: Duration,
    result_wait: Duration,
    // `-L` always writes the same file, so list runs take turns.
    list_lock: Arc<Mutex<()>>,
}

impl QmsClient {
    pub fn new(config: &Config) -> Self {
        QmsClient {
            runner: ProcessRunner::new(&config.binary_path),
            waiter: ResultFileWaiter::default(),
            server_data_path: config.server_data_path.clone(),
            test_result_path: config.test_result_path.clone(),
            exec_timeout: config.exec_timeout,
            file_wait_timeout: config.file_wait_timeout,
            result_wait: config.result_wait,
            list_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_waiter(mut self, waiter: ResultFileWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    /// A fresh sibling of the configured result path, e.g.
    /// `data/test-1f2e3d4c5b6a.json` for `data/test.json`.
    pub fn unique_result_path(&self) -> PathBuf {
        let stem = self
            .test_result_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("result");
        let name = match self.test_result_path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{stem}-{}.{ext}", short_id()),
            None => format!("{stem}-{}", short_id()),
        };
        self.test_result_path.with_file_name(name)
    }

    fn speedtest_args(output: &Path, server_id: Option<u32>) -> Vec<String> {
        let mut args = Vec::with_capacity(6);
        if let Some(id) = server_id {
            args.push("-S".to_string());
            args.push(id.to_string());
        }
        args.push("-O".to_string());
        args.push(output.to_string_lossy().into_owned());
        args.push("-F".to_string());
        args.push("json".to_string());
        args
    }

    /// Runs list mode and decodes the fixed list file. Callers hold `list_lock`.
    async fn list_servers(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Vec<Server>> {
        if let RunOutcome::ToleratedAbort { reason } =
            self.runner.run(&["-L".to_string()], deadline, cancel).await?
        {
            debug!(%reason, "server list run aborted after output");
        }

        let wait_until = deadline.min(Instant::now() + self.file_wait_timeout);
        self.waiter.wait(&self.server_data_path, wait_until, cancel).await?;

        read_json(&self.server_data_path, "server list").await
    }

    /// Runs test mode into `output` and decodes what it wrote.
    async fn speedtest_into(
        &self,
        output: &Path,
        deadline: Instant,
        cancel: &CancellationToken,
        server_id: Option<u32>,
    ) -> Result<SpeedtestResult> {
        let args = Self::speedtest_args(output, server_id);

        if let RunOutcome::ToleratedAbort { reason } = self.runner.run(&args, deadline, cancel).await? {
            debug!(%reason, "speedtest aborted after output");
        }

        // The binary blocks until it is done; this is only a final guard.
        let guard_until = deadline.min(Instant::now() + self.result_wait);
        match self.waiter.wait_for(output, guard_until, cancel).await {
            WaitState::Ready => {}
            WaitState::Cancelled => {
                return Err(SpeedtestError::Cancelled(format!(
                    "stopped waiting for {}",
                    output.display()
                )));
            }
            WaitState::TimedOut | WaitState::Waiting if Instant::now() >= deadline => {
                return Err(SpeedtestError::Timeout(format!(
                    "{} did not appear before the deadline",
                    output.display()
                )));
            }
            WaitState::TimedOut | WaitState::Waiting => {
                return Err(SpeedtestError::ResultMissing(format!(
                    "{} was not written",
                    output.display()
                )));
            }
        }

        read_json(output, "test result").await
    }
}

#[async_trait]
impl SpeedtestAdapter for QmsClient {
    async fn fetch_servers(&self, cancel: &CancellationToken) -> Result<Artifact<Vec<Server>>> {
        let deadline = Instant::now() + self.exec_timeout;
        let started = Instant::now();
        let _turn = tokio::select! {
            turn = self.list_lock.lock() => turn,
            _ = cancel.cancelled() => {
                return Err(SpeedtestError::Cancelled("waiting for the server list lock".into()));
            }
            _ = time::sleep_until(deadline) => {
                return Err(SpeedtestError::Timeout(
                    "deadline passed waiting for the server list lock".into(),
                ));
            }
        };

        // A leftover list would satisfy the waiter before the binary runs.
        remove_file(&self.server_data_path).await;

        let servers = match self.list_servers(deadline, cancel).await {
            Ok(servers) => servers,
            Err(e) => {
                remove_file(&self.server_data_path).await;
                return Err(e);
            }
        };
        info!(
            count = servers.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "server list ready"
        );

        Ok(Artifact {
            value: servers,
            path: self.server_data_path.clone(),
        })
    }

    async fn run_speedtest(
        &self,
        cancel: &CancellationToken,
        server_id: Option<u32>,
    ) -> Result<Artifact<SpeedtestResult>> {
        let output = self.unique_result_path();
        if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                SpeedtestError::ExecutionFailed(format!(
                    "can't create result directory {}: {e}",
                    dir.display()
                ))
            })?;
        }

        let started = Instant::now();
        let deadline = started + self.exec_timeout;
        let mut result = match self.speedtest_into(&output, deadline, cancel, server_id).await {
            Ok(result) => result,
            Err(e) => {
                // Nobody gets an artifact to clean up on failure.
                remove_file(&output).await;
                return Err(e);
            }
        };
        result.duration = started.elapsed();
        info!(
            server = %result.server,
            download_mbps = result.download,
            upload_mbps = result.upload,
            ping_ms = result.ping,
            duration_ms = result.duration.as_millis() as u64,
            "speedtest finished"
        );

        Ok(Artifact {
            value: result,
            path: output,
        })
    }

    async fn remove_artifact(&self, path: &Path) {
        let _turn = if path == self.server_data_path {
            Some(self.list_lock.lock().await)
        } else {
            None
        };
        remove_file(path).await;
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path, what: &'static str) -> Result<T> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        SpeedtestError::ResultMissing(format!("can't read {what} from {}: {e}", path.display()))
    })?;
    serde_json::from_slice(&bytes).map_err(|source| {
        warn!(file = %path.display(), error = %source, "failed to decode {what}");
        SpeedtestError::DecodeFailed { what, source }
    })
}

async fn remove_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(file = %path.display(), "artifact removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(file = %path.display(), "artifact already gone")
        }
        Err(e) => warn!(file = %path.display(), error = %e, "failed to remove artifact"),
    }
}
