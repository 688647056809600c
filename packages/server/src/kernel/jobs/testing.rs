//! Job testing utilities.
//!
//! [`InMemoryJobStore`] follows the same transition rules as
//! [`PostgresJobStore`](super::PostgresJobStore) so workers, the dispatcher
//! and the producer can be exercised without a database. Every operation
//! holds a single lock, which gives the same per-job atomicity the SQL
//! statements provide.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::job::{to_chrono, ErrorKind, FailureOutcome, Job, JobStatus, NewJob};
use super::queue::{EnqueueResult, JobStore, ReleasedClaims, StoreSettings};

/// In-memory job store for tests.
#[derive(Debug)]
pub struct InMemoryJobStore {
    /// Insertion order doubles as FIFO order
    jobs: Mutex<Vec<Job>>,
    settings: StoreSettings,
    /// Added to the wall clock, lets tests skip over backoff and leases
    clock_offset: Mutex<chrono::Duration>,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::with_settings(StoreSettings::default())
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: StoreSettings) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            settings,
            clock_offset: Mutex::new(chrono::Duration::zero()),
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Move the store's clock forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self
            .clock_offset
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *offset += to_chrono(by);
    }

    /// Snapshot of every job, oldest first.
    pub fn jobs(&self) -> Vec<Job> {
        self.lock().clone()
    }

    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.lock().iter().find(|j| j.id == job_id).cloned()
    }

    fn now(&self) -> DateTime<Utc> {
        let offset = *self
            .clock_offset
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Utc::now() + offset
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn find_mut(jobs: &mut [Job], job_id: Uuid) -> Option<&mut Job> {
    jobs.iter_mut().find(|j| j.id == job_id)
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, new: NewJob) -> StoreResult<EnqueueResult> {
        let now = self.now();
        let mut jobs = self.lock();

        if let Some(key) = new.idempotency_key.as_deref() {
            if let Some(existing) = jobs
                .iter()
                .find(|j| j.idempotency_key.as_deref() == Some(key))
            {
                return Ok(EnqueueResult::Duplicate(existing.id));
            }
        }

        let job = Job::from_new(new, now);
        let id = job.id;
        jobs.push(job);
        Ok(EnqueueResult::Created(id))
    }

    async fn claim_next(&self, worker_id: &str) -> StoreResult<Option<Job>> {
        let now = self.now();
        let mut jobs = self.lock();

        let Some(job) = jobs.iter_mut().find(|j| j.is_claimable(now)) else {
            return Ok(None);
        };

        job.status = JobStatus::Running;
        job.attempt_count += 1;
        job.claimed_by = Some(worker_id.to_string());
        job.lease_expires_at = Some(now + to_chrono(self.settings.lease_duration));
        job.started_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> StoreResult<bool> {
        let now = self.now();
        let mut jobs = self.lock();

        match find_mut(&mut jobs, job_id) {
            Some(job)
                if job.status == JobStatus::Running
                    && job.claimed_by.as_deref() == Some(worker_id) =>
            {
                job.lease_expires_at = Some(now + to_chrono(self.settings.lease_duration));
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: &str,
    ) -> StoreResult<bool> {
        let now = self.now();
        let mut jobs = self.lock();

        match find_mut(&mut jobs, job_id) {
            Some(job) if job.is_held_by(worker_id) => {
                job.status = JobStatus::Completed;
                job.result = Some(result.to_string());
                job.claimed_by = None;
                job.lease_expires_at = None;
                job.notify_next_at = Some(now);
                job.completed_at = Some(now);
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        kind: ErrorKind,
    ) -> StoreResult<FailureOutcome> {
        let now = self.now();
        let mut jobs = self.lock();
        let job = find_mut(&mut jobs, job_id).ok_or(StoreError::NotFound(job_id))?;

        let outcome = job.plan_failure(worker_id, kind, &self.settings.retry, now);
        match outcome {
            FailureOutcome::Retrying {
                next_attempt_at, ..
            } => {
                job.status = JobStatus::Pending;
                job.next_attempt_at = next_attempt_at;
            }
            FailureOutcome::Failed { .. } => {
                job.status = JobStatus::Failed;
                job.completed_at = Some(now);
            }
            FailureOutcome::Ignored => return Ok(outcome),
        }

        job.claimed_by = None;
        job.lease_expires_at = None;
        job.error_message = Some(error.to_string());
        job.error_kind = Some(kind);
        job.updated_at = now;
        Ok(outcome)
    }

    async fn release_stale_claims(&self, lease_timeout: Duration) -> StoreResult<ReleasedClaims> {
        let now = self.now();
        let mut jobs = self.lock();
        let mut released = ReleasedClaims::default();

        for job in jobs.iter_mut().filter(|j| j.is_stale(now, lease_timeout)) {
            let holder = job.claimed_by.take();
            job.error_message = Some(format!(
                "lease expired while claimed by {}",
                holder.as_deref().unwrap_or("unknown worker")
            ));
            job.error_kind = Some(ErrorKind::LeaseExpired);
            job.lease_expires_at = None;
            job.next_attempt_at = now;
            job.updated_at = now;

            if job.attempt_count < job.max_attempts {
                job.status = JobStatus::Pending;
                released.requeued.push(job.id);
            } else {
                job.status = JobStatus::Failed;
                job.completed_at = Some(now);
                released.failed.push(job.id);
            }
        }

        Ok(released)
    }

    async fn claim_notification(&self, job_id: Uuid) -> StoreResult<Option<Job>> {
        let now = self.now();
        let max = self.settings.max_notify_attempts;
        let mut jobs = self.lock();

        match find_mut(&mut jobs, job_id) {
            Some(job) if job.is_delivery_due(now, max) => {
                claim_delivery(job, &self.settings, now);
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn claim_due_notification(&self) -> StoreResult<Option<Job>> {
        let now = self.now();
        let max = self.settings.max_notify_attempts;
        let mut jobs = self.lock();

        let Some(job) = jobs
            .iter_mut()
            .filter(|j| j.is_delivery_due(now, max))
            .min_by_key(|j| (j.notify_next_at, j.id))
        else {
            return Ok(None);
        };

        claim_delivery(job, &self.settings, now);
        Ok(Some(job.clone()))
    }

    async fn mark_notified(&self, job_id: Uuid) -> StoreResult<bool> {
        let now = self.now();
        let mut jobs = self.lock();

        match find_mut(&mut jobs, job_id) {
            Some(job) if job.notified_at.is_none() => {
                job.notified_at = Some(now);
                job.notify_error = None;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_notification_failure(&self, job_id: Uuid, error: &str) -> StoreResult<()> {
        let now = self.now();
        let mut jobs = self.lock();

        if let Some(job) = find_mut(&mut jobs, job_id) {
            job.notify_error = Some(error.to_string());
            job.updated_at = now;
        }
        Ok(())
    }

    async fn find_job(&self, job_id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self.get(job_id))
    }

    async fn list_jobs(&self, status: Option<JobStatus>, limit: i64) -> StoreResult<Vec<Job>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .lock()
            .iter()
            .rev()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn retrigger(&self, job_id: Uuid) -> StoreResult<Uuid> {
        let now = self.now();
        let mut jobs = self.lock();

        let original = jobs
            .iter()
            .find(|j| j.id == job_id)
            .ok_or(StoreError::NotFound(job_id))?;
        if !original.is_terminal() {
            return Err(StoreError::NotTerminal(job_id));
        }

        let copy = Job::from_new(
            NewJob::builder()
                .job_type(original.job_type.clone())
                .payload(original.payload.clone())
                .max_attempts(original.max_attempts)
                .root_job_id(original.root_job_id.unwrap_or(original.id))
                .build(),
            now,
        );
        let id = copy.id;
        jobs.push(copy);
        Ok(id)
    }
}

/// Count the attempt and hold the delivery until the retry delay elapses.
fn claim_delivery(job: &mut Job, settings: &StoreSettings, now: DateTime<Utc>) {
    job.notify_attempts += 1;
    job.notify_next_at = Some(now + to_chrono(settings.notify_retry.delay_after(job.notify_attempts)));
    job.updated_at = now;
}
