//! Job model for background report execution.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_error_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - will not retry
    NonRetryable,
    /// Execution exceeded the job timeout - will retry
    Timeout,
    /// The holding worker stopped renewing its lease
    LeaseExpired,
}

impl ErrorKind {
    /// Whether this error kind should trigger a retry
    pub fn should_retry(&self) -> bool {
        matches!(
            self,
            ErrorKind::Retryable | ErrorKind::Timeout | ErrorKind::LeaseExpired
        )
    }
}

// ============================================================================
// Retry policy
// ============================================================================

/// Exponential backoff with a cap.
///
/// The delay before attempt `n + 1` is `base * 2^(n - 1)`, clamped to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// No delay between attempts. Useful in tests.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay after the given number of completed attempts (1-based).
    pub fn delay_after(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 30) as u32;
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// What `mark_failed` did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to pending; eligible again at `next_attempt_at`
    Retrying {
        attempt: i32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Terminally failed
    Failed { attempts: i32 },
    /// The reporting worker no longer held the job, nothing changed
    Ignored,
}

// ============================================================================
// Job Model
// ============================================================================

/// Input for [`JobStore::enqueue`](super::JobStore::enqueue).
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewJob {
    pub job_type: String,
    pub payload: serde_json::Value,
    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,
    #[builder(default = 3)]
    pub max_attempts: i32,
    #[builder(default, setter(strip_option))]
    pub root_job_id: Option<Uuid>,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,

    // Attempts
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_attempt_at: DateTime<Utc>,

    // Claim
    pub claimed_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    // Outcome
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,

    // Delivery
    pub notified_at: Option<DateTime<Utc>>,
    pub notify_attempts: i32,
    pub notify_next_at: Option<DateTime<Utc>>,
    pub notify_error: Option<String>,

    pub root_job_id: Option<Uuid>,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a fresh pending job from enqueue input.
    pub fn from_new(new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_type: new.job_type,
            status: JobStatus::Pending,
            payload: new.payload,
            idempotency_key: new.idempotency_key,
            attempt_count: 0,
            max_attempts: new.max_attempts,
            next_attempt_at: now,
            claimed_by: None,
            lease_expires_at: None,
            result: None,
            error_message: None,
            error_kind: None,
            notified_at: None,
            notify_attempts: 0,
            notify_next_at: None,
            notify_error: None,
            root_job_id: new.root_job_id,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Pending, backoff elapsed and attempts remaining.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.next_attempt_at <= now
            && self.attempt_count < self.max_attempts
    }

    /// A running job whose claim has been abandoned.
    ///
    /// Jobs without a lease fall back to `updated_at + lease_timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, lease_timeout: Duration) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        let deadline = self
            .lease_expires_at
            .unwrap_or_else(|| self.updated_at + to_chrono(lease_timeout));
        deadline <= now
    }

    /// Completed, not yet notified, and due for a delivery attempt.
    pub fn is_delivery_due(&self, now: DateTime<Utc>, max_notify_attempts: i32) -> bool {
        self.status == JobStatus::Completed
            && self.notified_at.is_none()
            && self.notify_attempts < max_notify_attempts
            && self.notify_next_at.map_or(true, |at| at <= now)
    }

    /// Running under a claim taken by `worker_id`.
    pub fn is_held_by(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Running && self.claimed_by.as_deref() == Some(worker_id)
    }

    /// Decide the transition for a failed attempt reported by `worker_id`.
    ///
    /// Reports from a worker that no longer holds the claim are ignored.
    pub fn plan_failure(
        &self,
        worker_id: &str,
        kind: ErrorKind,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> FailureOutcome {
        if !self.is_held_by(worker_id) {
            return FailureOutcome::Ignored;
        }

        if kind.should_retry() && self.attempt_count < self.max_attempts {
            FailureOutcome::Retrying {
                attempt: self.attempt_count,
                next_attempt_at: now + to_chrono(policy.delay_after(self.attempt_count)),
            }
        } else {
            FailureOutcome::Failed {
                attempts: self.attempt_count,
            }
        }
    }
}

/// Convert a std duration into a chrono duration, saturating on overflow.
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::from_new(
            NewJob::builder()
                .job_type("test_job")
                .payload(serde_json::json!({"target": "restaurant-123"}))
                .build(),
            Utc::now(),
        )
    }

    fn running(mut job: Job) -> Job {
        job.status = JobStatus::Running;
        job.attempt_count += 1;
        job.claimed_by = Some("w1".to_string());
        job
    }

    #[test]
    fn new_job_starts_pending_with_zero_attempts() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt_count, 0);
        assert_eq!(job.max_attempts, 3);
    }

    #[test]
    fn new_job_is_claimable_immediately() {
        let job = sample_job();
        assert!(job.is_claimable(Utc::now()));
    }

    #[test]
    fn job_in_backoff_is_not_claimable() {
        let mut job = sample_job();
        job.next_attempt_at = Utc::now() + chrono::Duration::minutes(5);
        assert!(!job.is_claimable(Utc::now()));
    }

    #[test]
    fn exhausted_job_is_not_claimable() {
        let mut job = sample_job();
        job.attempt_count = job.max_attempts;
        assert!(!job.is_claimable(Utc::now()));
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("dead_letter".parse::<JobStatus>().is_err());
    }

    #[test]
    fn retryable_kinds_should_retry() {
        assert!(ErrorKind::Retryable.should_retry());
        assert!(ErrorKind::Timeout.should_retry());
        assert!(ErrorKind::LeaseExpired.should_retry());
        assert!(!ErrorKind::NonRetryable.should_retry());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(Duration::from_secs(30), Duration::from_secs(100));
        assert_eq!(policy.delay_after(1), Duration::from_secs(30));
        assert_eq!(policy.delay_after(2), Duration::from_secs(60));
        assert_eq!(policy.delay_after(3), Duration::from_secs(100));
        assert_eq!(policy.delay_after(40), Duration::from_secs(100));
    }

    #[test]
    fn retryable_failure_with_attempts_left_is_retried() {
        let job = running(sample_job());
        let now = Utc::now();
        let outcome = job.plan_failure("w1", ErrorKind::Retryable, &RetryPolicy::default(), now);
        assert_eq!(
            outcome,
            FailureOutcome::Retrying {
                attempt: 1,
                next_attempt_at: now + chrono::Duration::seconds(30),
            }
        );
    }

    #[test]
    fn retryable_failure_on_last_attempt_is_terminal() {
        let mut job = running(sample_job());
        job.attempt_count = job.max_attempts;
        let outcome = job.plan_failure("w1", ErrorKind::Timeout, &RetryPolicy::default(), Utc::now());
        assert_eq!(outcome, FailureOutcome::Failed { attempts: 3 });
    }

    #[test]
    fn permanent_failure_is_terminal_on_first_attempt() {
        let job = running(sample_job());
        let outcome =
            job.plan_failure("w1", ErrorKind::NonRetryable, &RetryPolicy::default(), Utc::now());
        assert_eq!(outcome, FailureOutcome::Failed { attempts: 1 });
    }

    #[test]
    fn failure_of_pending_job_is_ignored() {
        let job = sample_job();
        let outcome = job.plan_failure("w1", ErrorKind::Retryable, &RetryPolicy::default(), Utc::now());
        assert_eq!(outcome, FailureOutcome::Ignored);
    }

    #[test]
    fn failure_reported_by_previous_holder_is_ignored() {
        let mut job = running(sample_job());
        job.claimed_by = Some("w2".to_string());
        assert!(!job.is_held_by("w1"));
        let outcome = job.plan_failure("w1", ErrorKind::Retryable, &RetryPolicy::default(), Utc::now());
        assert_eq!(outcome, FailureOutcome::Ignored);
        assert!(matches!(
            job.plan_failure("w2", ErrorKind::Retryable, &RetryPolicy::default(), Utc::now()),
            FailureOutcome::Retrying { .. }
        ));
    }

    #[test]
    fn running_job_with_expired_lease_is_stale() {
        let now = Utc::now();
        let mut job = running(sample_job());
        job.lease_expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(job.is_stale(now, Duration::from_secs(300)));

        job.lease_expires_at = Some(now + chrono::Duration::seconds(60));
        assert!(!job.is_stale(now, Duration::from_secs(300)));
    }

    #[test]
    fn running_job_without_lease_uses_timeout() {
        let now = Utc::now();
        let mut job = running(sample_job());
        job.updated_at = now - chrono::Duration::seconds(600);
        assert!(job.is_stale(now, Duration::from_secs(300)));
        assert!(!job.is_stale(now, Duration::from_secs(900)));
    }
}
