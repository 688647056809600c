//! Job store abstraction.
//!
//! The store is the only shared mutable state between workers. Every
//! transition goes through one of these operations and is atomic for a
//! single job.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::error::StoreResult;
use super::job::{ErrorKind, FailureOutcome, Job, JobStatus, NewJob, RetryPolicy};

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Job was enqueued, returns new job ID
    Created(Uuid),
    /// Idempotency key already used, returns existing job ID
    Duplicate(Uuid),
}

impl EnqueueResult {
    /// Get the job ID regardless of whether it was created or duplicate
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    /// Returns true if this was a newly created job
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// Summary of a stale-claim sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleasedClaims {
    /// Returned to pending
    pub requeued: Vec<Uuid>,
    /// Out of attempts, now terminally failed
    pub failed: Vec<Uuid>,
}

impl ReleasedClaims {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

/// Store-side policy, shared by every implementation.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Lease granted on claim and on each heartbeat
    pub lease_duration: Duration,
    /// Backoff before a failed job becomes claimable again
    pub retry: RetryPolicy,
    /// Backoff between delivery attempts; also the in-flight window of a claimed delivery
    pub notify_retry: RetryPolicy,
    pub max_notify_attempts: i32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            notify_retry: RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(3600)),
            max_notify_attempts: 5,
        }
    }
}

/// Durable job store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a pending job.
    ///
    /// If the job carries an idempotency key that was already used, nothing is
    /// inserted and `EnqueueResult::Duplicate` with the existing job ID is returned.
    async fn enqueue(&self, job: NewJob) -> StoreResult<EnqueueResult>;

    /// Atomically claim the oldest claimable job.
    ///
    /// FIFO by `created_at`, ties broken by `id`. The claimed job is `running`,
    /// its `attempt_count` incremented and its lease set. Two concurrent callers
    /// never receive the same job; a caller that loses a race gets `None`.
    async fn claim_next(&self, worker_id: &str) -> StoreResult<Option<Job>>;

    /// Extend the lease of a job still held by `worker_id`.
    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> StoreResult<bool>;

    /// Record success. Returns false (and changes nothing) unless the job is
    /// still running under `worker_id`'s claim.
    async fn mark_completed(&self, job_id: Uuid, worker_id: &str, result: &str)
        -> StoreResult<bool>;

    /// Record a failed attempt.
    ///
    /// Retryable kinds with attempts left go back to pending after backoff;
    /// everything else becomes terminally failed. A report from a worker that
    /// no longer holds the claim is `FailureOutcome::Ignored`.
    async fn mark_failed(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        kind: ErrorKind,
    ) -> StoreResult<FailureOutcome>;

    /// Return abandoned running jobs to pending (or fail them if out of attempts).
    async fn release_stale_claims(&self, lease_timeout: Duration) -> StoreResult<ReleasedClaims>;

    /// Claim the delivery of a specific completed job, if it is due.
    async fn claim_notification(&self, job_id: Uuid) -> StoreResult<Option<Job>>;

    /// Claim the delivery of any completed job that is due.
    async fn claim_due_notification(&self) -> StoreResult<Option<Job>>;

    /// Record a successful delivery. Returns false if it was already recorded.
    async fn mark_notified(&self, job_id: Uuid) -> StoreResult<bool>;

    async fn record_notification_failure(&self, job_id: Uuid, error: &str) -> StoreResult<()>;

    async fn find_job(&self, job_id: Uuid) -> StoreResult<Option<Job>>;

    /// Newest first.
    async fn list_jobs(&self, status: Option<JobStatus>, limit: i64) -> StoreResult<Vec<Job>>;

    /// Enqueue a fresh copy of a terminal job for operational recovery.
    ///
    /// The original row is left untouched; the copy points at it via `root_job_id`.
    async fn retrigger(&self, job_id: Uuid) -> StoreResult<Uuid>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_result_helpers() {
        let id = Uuid::new_v4();
        let created = EnqueueResult::Created(id);
        assert!(created.is_created());
        assert_eq!(created.job_id(), id);

        let duplicate = EnqueueResult::Duplicate(id);
        assert!(!duplicate.is_created());
        assert_eq!(duplicate.job_id(), id);
    }

    #[test]
    fn empty_release_report() {
        assert!(ReleasedClaims::default().is_empty());
    }
}
