//! Job runner: a pool of workers plus the stale-claim reaper.
//!
//! ```text
//! JobRunner
//!     │
//!     ├─► worker-1 .. worker-N   (JobWorker::run)
//!     └─► reaper                 (release_stale_claims every reaper_interval)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let worker = JobWorker::new(store.clone(), JobWorkerConfig::default())
//!     .with_handler(Arc::new(handler));
//! let handle = JobRunner::new(store, worker, JobRunnerConfig::default()).start();
//!
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use super::queue::JobStore;
use super::worker::JobWorker;

/// Configuration for the job runner.
#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    /// Number of concurrent workers
    pub worker_count: usize,
    /// How often the reaper looks for abandoned claims
    pub reaper_interval: Duration,
    /// Fallback lease for running jobs that never recorded one
    pub lease_timeout: Duration,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            reaper_interval: Duration::from_secs(60),
            lease_timeout: Duration::from_secs(300),
        }
    }
}

pub struct JobRunner {
    store: Arc<dyn JobStore>,
    worker: JobWorker,
    config: JobRunnerConfig,
}

impl JobRunner {
    /// `worker` is the template; each spawned worker gets `<worker_id>-<n>`.
    pub fn new(store: Arc<dyn JobStore>, worker: JobWorker, config: JobRunnerConfig) -> Self {
        Self {
            store,
            worker,
            config,
        }
    }

    /// Spawn the workers and the reaper.
    pub fn start(self) -> RunnerHandle {
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::with_capacity(self.config.worker_count + 1);

        info!(
            workers = self.config.worker_count,
            reaper_interval = ?self.config.reaper_interval,
            "job runner starting"
        );

        for n in 1..=self.config.worker_count.max(1) {
            let worker = self
                .worker
                .with_worker_id(format!("{}-{}", self.worker.worker_id(), n));
            let span = info_span!("worker", worker_id = %worker.worker_id());
            let token = shutdown.clone();
            tasks.push(tokio::spawn(
                async move { worker.run(token).await }.instrument(span),
            ));
        }

        tasks.push(tokio::spawn(
            reap(self.store, self.config, shutdown.clone()).instrument(info_span!("reaper")),
        ));

        RunnerHandle { shutdown, tasks }
    }
}

async fn reap(store: Arc<dyn JobStore>, config: JobRunnerConfig, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(config.reaper_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = store.release_stale_claims(config.lease_timeout).await {
                    error!(error = %e, "failed to release stale claims");
                }
            }
        }
    }
}

/// Handle to a started [`JobRunner`].
pub struct RunnerHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunnerHandle {
    /// Token that stops every task when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal shutdown and wait for every task to stop.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.join().await;
    }

    /// Wait for every task to stop.
    pub async fn join(self) {
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                error!(error = %e, "job runner task panicked");
            }
        }
        info!("job runner stopped");
    }
}
