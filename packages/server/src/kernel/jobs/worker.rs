//! Job worker loop.
//!
//! A `JobWorker` repeatedly:
//! - claims the oldest claimable job from the [`JobStore`]
//! - runs the registered [`JobHandler`] under a timeout, renewing the lease
//!   with heartbeats while it runs
//! - records the outcome (completed, retrying or failed)
//!
//! ```text
//! JobWorker
//!     │
//!     ├─► claim_next (JobStore)
//!     ├─► JobHandler::execute   ◄── heartbeat task renews the lease
//!     ├─► mark_completed / mark_failed (JobStore)
//!     └─► JobHandler::after_completed
//! ```
//!
//! Store errors never crash the loop; the worker logs them and backs off.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{JobError, StoreResult};
use super::job::{ErrorKind, FailureOutcome, Job};
use super::queue::JobStore;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Worker ID for this instance, recorded as `claimed_by`
    pub worker_id: String,
    /// How long to sleep when no job is claimable
    pub poll_interval: Duration,
    /// Upper bound on a single attempt
    pub job_timeout: Duration,
    /// How often to renew the lease of the running job
    pub heartbeat_interval: Duration,
    /// First sleep after a store error; doubles up to `max_error_backoff`
    pub error_backoff: Duration,
    pub max_error_backoff: Duration,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(30 * 60),
            heartbeat_interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(1),
            max_error_backoff: Duration::from_secs(60),
        }
    }
}

impl JobWorkerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }

    /// Longest sleep after consecutive store errors.
    pub fn error_backoff_cap(&self) -> Duration {
        self.max_error_backoff.min(self.poll_interval.saturating_mul(8))
    }
}

/// Executes one job type.
///
/// `execute` decides whether a failure is transient or permanent by the
/// [`JobError`] variant it returns. The returned string is stored as the
/// job's result.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;

    async fn execute(&self, job: &Job) -> Result<String, JobError>;

    /// Runs after the store accepted the completion.
    async fn after_completed(&self, _job_id: Uuid) {}

    /// Runs whenever a poll finds nothing to claim.
    async fn on_idle(&self) {}
}

/// What happened to a claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Completed {
        job_id: Uuid,
    },
    Retrying {
        job_id: Uuid,
        next_attempt_at: DateTime<Utc>,
    },
    Failed {
        job_id: Uuid,
    },
    /// The claim was lost before the outcome could be recorded
    Abandoned {
        job_id: Uuid,
    },
}

impl WorkOutcome {
    pub fn job_id(&self) -> Uuid {
        match self {
            WorkOutcome::Completed { job_id }
            | WorkOutcome::Retrying { job_id, .. }
            | WorkOutcome::Failed { job_id }
            | WorkOutcome::Abandoned { job_id } => *job_id,
        }
    }
}

enum Attempt {
    Finished(Result<String, JobError>),
    LeaseLost,
}

/// A single worker. Cheap to clone; clones share the store and handlers.
#[derive(Clone)]
pub struct JobWorker {
    store: Arc<dyn JobStore>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    config: JobWorkerConfig,
}

impl JobWorker {
    pub fn new(store: Arc<dyn JobStore>, config: JobWorkerConfig) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            config,
        }
    }

    /// Register the handler for its job type, replacing any previous one.
    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.job_type(), handler);
        self
    }

    pub fn config(&self) -> &JobWorkerConfig {
        &self.config
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Same worker with a different ID, for running several in one process.
    pub fn with_worker_id(&self, worker_id: impl Into<String>) -> Self {
        let mut worker = self.clone();
        worker.config.worker_id = worker_id.into();
        worker
    }

    /// Claim and process at most one job.
    ///
    /// Returns `Ok(None)` when nothing was claimable.
    pub async fn run_once(&self) -> StoreResult<Option<WorkOutcome>> {
        self.poll().await
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// A job in flight when shutdown is requested runs to completion first.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.config.worker_id, "job worker starting");

        let max_backoff = self.config.error_backoff_cap();
        let mut backoff = self.config.error_backoff;
        while !shutdown.is_cancelled() {
            let sleep_for = match self.poll().await {
                Ok(Some(outcome)) => {
                    debug!(job_id = %outcome.job_id(), ?outcome, "job processed");
                    backoff = self.config.error_backoff;
                    continue;
                }
                Ok(None) => {
                    backoff = self.config.error_backoff;
                    for handler in self.handlers.values() {
                        handler.on_idle().await;
                    }
                    self.config.poll_interval
                }
                Err(e) => {
                    error!(worker_id = %self.config.worker_id, error = %e, "job store error");
                    let current = backoff;
                    backoff = backoff.saturating_mul(2).min(max_backoff);
                    current
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }

        info!(worker_id = %self.config.worker_id, "job worker stopped");
    }

    async fn poll(&self) -> StoreResult<Option<WorkOutcome>> {
        let Some(job) = self.store.claim_next(&self.config.worker_id).await? else {
            return Ok(None);
        };

        debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempt_count,
            "claimed job"
        );

        self.process(job).await.map(Some)
    }

    async fn process(&self, job: Job) -> StoreResult<WorkOutcome> {
        let job_id = job.id;

        let Some(handler) = self.handlers.get(job.job_type.as_str()).cloned() else {
            error!(job_id = %job_id, job_type = %job.job_type, "no handler registered");
            let message = format!("no handler registered for job type {}", job.job_type);
            return self
                .record_failure(job_id, &message, ErrorKind::NonRetryable)
                .await;
        };

        match self.execute_with_heartbeat(&job, handler.as_ref()).await {
            Attempt::Finished(Ok(result)) => {
                if !self
                    .store
                    .mark_completed(job_id, &self.config.worker_id, &result)
                    .await?
                {
                    return Ok(WorkOutcome::Abandoned { job_id });
                }
                info!(job_id = %job_id, job_type = %job.job_type, "job completed");
                handler.after_completed(job_id).await;
                Ok(WorkOutcome::Completed { job_id })
            }
            Attempt::Finished(Err(e)) => {
                warn!(
                    job_id = %job_id,
                    job_type = %job.job_type,
                    attempt = job.attempt_count,
                    error = %e,
                    "job failed"
                );
                self.record_failure(job_id, &e.to_string(), e.kind()).await
            }
            Attempt::LeaseLost => {
                warn!(job_id = %job_id, "lease lost, abandoning job");
                Ok(WorkOutcome::Abandoned { job_id })
            }
        }
    }

    async fn record_failure(
        &self,
        job_id: Uuid,
        message: &str,
        kind: ErrorKind,
    ) -> StoreResult<WorkOutcome> {
        let outcome = match self
            .store
            .mark_failed(job_id, &self.config.worker_id, message, kind)
            .await?
        {
            FailureOutcome::Retrying {
                attempt,
                next_attempt_at,
            } => {
                info!(job_id = %job_id, attempt, %next_attempt_at, "job scheduled for retry");
                WorkOutcome::Retrying {
                    job_id,
                    next_attempt_at,
                }
            }
            FailureOutcome::Failed { attempts } => {
                error!(job_id = %job_id, attempts, error = %message, "job failed permanently");
                WorkOutcome::Failed { job_id }
            }
            FailureOutcome::Ignored => WorkOutcome::Abandoned { job_id },
        };
        Ok(outcome)
    }

    /// Run the handler under the job timeout while a background task renews the lease.
    async fn execute_with_heartbeat(
        &self,
        job: &Job,
        handler: &dyn JobHandler,
    ) -> Attempt {
        let store = self.store.clone();
        let job_id = job.id;
        let worker_id = self.config.worker_id.clone();
        let heartbeat_interval = self.config.heartbeat_interval;

        let done = CancellationToken::new();
        let lease_lost = CancellationToken::new();

        let heartbeat_done = done.clone();
        let heartbeat_lost = lease_lost.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    _ = heartbeat_done.cancelled() => break,
                    _ = interval.tick() => {
                        match store.heartbeat(job_id, &worker_id).await {
                            Ok(true) => {}
                            Ok(false) => {
                                heartbeat_lost.cancel();
                                break;
                            }
                            Err(e) => warn!(job_id = %job_id, error = %e, "heartbeat failed"),
                        }
                    }
                }
            }
        });

        let timeout = self.config.job_timeout;
        let attempt = tokio::select! {
            result = tokio::time::timeout(timeout, handler.execute(job)) => {
                Attempt::Finished(result.unwrap_or(Err(JobError::Timeout(timeout))))
            }
            _ = lease_lost.cancelled() => Attempt::LeaseLost,
        };

        done.cancel();
        let _ = heartbeat_handle.await;

        attempt
    }
}
