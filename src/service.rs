//! Sequencing of adapter calls, cleanup and formatting.

// Copyright (c) 2025 Jak Bracegirdle
//
// This file is part of the speedtest_exporter crate.
//
// Licensed under the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::adapter::SpeedtestAdapter;
use crate::error::Result;
use crate::metrics;
use crate::models::Server;

/// Detached work that must never hold up a response but should be drained
/// on shutdown.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `task` without waiting for it.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Closes the tracker and gives running tasks up to `timeout` to finish.
    /// Returns false if some were still running.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok();
        if !drained {
            warn!(pending = self.tracker.len(), "background tasks still running at shutdown");
        }
        drained
    }
}

/// Speedtest operations as exposed over HTTP.
pub struct Service {
    adapter: Arc<dyn SpeedtestAdapter>,
    background: BackgroundTasks,
    default_server: Option<u32>,
}

impl Service {
    pub fn new(
        adapter: Arc<dyn SpeedtestAdapter>,
        background: BackgroundTasks,
        default_server: Option<u32>,
    ) -> Self {
        Service {
            adapter,
            background,
            default_server,
        }
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    pub async fn servers(&self, cancel: &CancellationToken) -> Result<Vec<Server>> {
        let artifact = self.adapter.fetch_servers(cancel).await?;
        self.cleanup(artifact.path);
        Ok(artifact.value)
    }

    /// Runs a speedtest and returns it as exposition text. `server_id`
    /// overrides the configured target server.
    pub async fn run_speedtest(&self, cancel: &CancellationToken, server_id: Option<u32>) -> Result<String> {
        let target = server_id.or(self.default_server);
        let artifact = self.adapter.run_speedtest(cancel, target).await?;
        let text = metrics::render(&artifact.value);
        self.cleanup(artifact.path);
        Ok(text)
    }

    fn cleanup(&self, path: PathBuf) {
        let adapter = Arc::clone(&self.adapter);
        self.background.spawn(async move {
            debug!(file = %path.display(), "scheduling artifact removal");
            adapter.remove_artifact(&path).await;
        });
    }
}
