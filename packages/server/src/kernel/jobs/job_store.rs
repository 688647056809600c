//! PostgreSQL implementation of [`JobStore`].
//!
//! Claims use `FOR UPDATE SKIP LOCKED` inside a single `UPDATE ... RETURNING`,
//! so a row is selected and transitioned to `running` in one statement and
//! concurrent workers skip rows another transaction already holds.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::job::{ErrorKind, FailureOutcome, Job, JobStatus, NewJob};
use super::queue::{EnqueueResult, JobStore, ReleasedClaims, StoreSettings};

macro_rules! job_columns {
    () => {
        "id, job_type, status, payload, idempotency_key, attempt_count, max_attempts, \
         next_attempt_at, claimed_by, lease_expires_at, result, error_message, error_kind, \
         notified_at, notify_attempts, notify_next_at, notify_error, root_job_id, \
         created_at, updated_at, started_at, completed_at"
    };
}

/// Durable job store backed by the `jobs` table.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
    settings: StoreSettings,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool, settings: StoreSettings) -> Self {
        Self { pool, settings }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    fn lease_secs(&self) -> f64 {
        self.settings.lease_duration.as_secs_f64()
    }

    async fn insert(&self, job: &NewJob) -> StoreResult<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO jobs (id, job_type, payload, max_attempts, root_job_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.max_attempts)
        .bind(job.root_job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Insert unless `key` is taken. Returns `None` on conflict.
    async fn insert_keyed(&self, job: &NewJob, key: &str) -> StoreResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO jobs (id, job_type, payload, idempotency_key, max_attempts, root_job_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(key)
        .bind(job.max_attempts)
        .bind(job.root_job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn claim_notification_where(&self, job_id: Option<Uuid>) -> StoreResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(concat!(
            r#"
            UPDATE jobs
            SET notify_attempts = notify_attempts + 1,
                notify_next_at = NOW() + make_interval(
                    secs => LEAST($2 * POWER(2.0::float8, notify_attempts), $3)
                ),
                updated_at = NOW()
            WHERE id = (
                SELECT id
                FROM jobs
                WHERE status = 'completed'
                  AND notified_at IS NULL
                  AND notify_attempts < $4
                  AND (notify_next_at IS NULL OR notify_next_at <= NOW())
                  AND ($1::uuid IS NULL OR id = $1)
                ORDER BY notify_next_at NULLS FIRST, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING "#,
            job_columns!()
        ))
        .bind(job_id)
        .bind(self.settings.notify_retry.base.as_secs_f64())
        .bind(self.settings.notify_retry.max.as_secs_f64())
        .bind(self.settings.max_notify_attempts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn enqueue(&self, job: NewJob) -> StoreResult<EnqueueResult> {
        let Some(key) = job.idempotency_key.as_deref() else {
            let id = self.insert(&job).await?;
            debug!(job_id = %id, job_type = %job.job_type, "job enqueued");
            return Ok(EnqueueResult::Created(id));
        };

        if let Some(id) = self.insert_keyed(&job, key).await? {
            debug!(job_id = %id, job_type = %job.job_type, idempotency_key = %key, "job enqueued");
            return Ok(EnqueueResult::Created(id));
        }

        let existing =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM jobs WHERE idempotency_key = $1")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;

        debug!(job_id = %existing, idempotency_key = %key, "duplicate enqueue ignored");
        Ok(EnqueueResult::Duplicate(existing))
    }

    async fn claim_next(&self, worker_id: &str) -> StoreResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(concat!(
            r#"
            UPDATE jobs
            SET status = 'running',
                attempt_count = attempt_count + 1,
                claimed_by = $1,
                lease_expires_at = NOW() + make_interval(secs => $2),
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                  AND next_attempt_at <= NOW()
                  AND attempt_count < max_attempts
                ORDER BY created_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING "#,
            job_columns!()
        ))
        .bind(worker_id)
        .bind(self.lease_secs())
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + make_interval(secs => $3),
                updated_at = NOW()
            WHERE id = $1 AND status = 'running' AND claimed_by = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(self.lease_secs())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: &str,
    ) -> StoreResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                result = $3,
                claimed_by = NULL,
                lease_expires_at = NULL,
                notify_next_at = NOW(),
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'running' AND claimed_by = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(result)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            warn!(job_id = %job_id, worker_id, "completion ignored, claim not held");
            return Ok(false);
        }

        Ok(true)
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        kind: ErrorKind,
    ) -> StoreResult<FailureOutcome> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>(concat!(
            "SELECT ",
            job_columns!(),
            " FROM jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(job_id))?;

        let outcome = match job.plan_failure(worker_id, kind, &self.settings.retry, Utc::now()) {
            FailureOutcome::Retrying { attempt, .. } => {
                let delay = self.settings.retry.delay_after(attempt);
                let next_attempt_at = sqlx::query_scalar::<_, DateTime<Utc>>(
                    r#"
                    UPDATE jobs
                    SET status = 'pending',
                        next_attempt_at = NOW() + make_interval(secs => $2),
                        claimed_by = NULL,
                        lease_expires_at = NULL,
                        error_message = $3,
                        error_kind = $4,
                        updated_at = NOW()
                    WHERE id = $1 AND claimed_by = $5
                    RETURNING next_attempt_at
                    "#,
                )
                .bind(job_id)
                .bind(delay.as_secs_f64())
                .bind(error)
                .bind(kind)
                .bind(worker_id)
                .fetch_one(&mut *tx)
                .await?;

                FailureOutcome::Retrying {
                    attempt,
                    next_attempt_at,
                }
            }
            FailureOutcome::Failed { attempts } => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'failed',
                        claimed_by = NULL,
                        lease_expires_at = NULL,
                        error_message = $2,
                        error_kind = $3,
                        completed_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1 AND claimed_by = $4
                    "#,
                )
                .bind(job_id)
                .bind(error)
                .bind(kind)
                .bind(worker_id)
                .execute(&mut *tx)
                .await?;

                FailureOutcome::Failed { attempts }
            }
            FailureOutcome::Ignored => {
                warn!(
                    job_id = %job_id,
                    worker_id,
                    status = %job.status,
                    claimed_by = ?job.claimed_by,
                    "failure ignored, claim not held"
                );
                FailureOutcome::Ignored
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn release_stale_claims(&self, lease_timeout: Duration) -> StoreResult<ReleasedClaims> {
        let rows = sqlx::query_as::<_, (Uuid, JobStatus)>(
            r#"
            UPDATE jobs
            SET status = CASE
                    WHEN attempt_count < max_attempts THEN 'pending'::job_status
                    ELSE 'failed'::job_status
                END,
                completed_at = CASE WHEN attempt_count < max_attempts THEN NULL ELSE NOW() END,
                next_attempt_at = NOW(),
                error_kind = 'lease_expired',
                error_message = 'lease expired while claimed by ' || COALESCE(claimed_by, 'unknown worker'),
                claimed_by = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE status = 'running'
              AND COALESCE(lease_expires_at, updated_at + make_interval(secs => $1)) <= NOW()
            RETURNING id, status
            "#,
        )
        .bind(lease_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        let mut released = ReleasedClaims::default();
        for (id, status) in rows {
            match status {
                JobStatus::Failed => released.failed.push(id),
                _ => released.requeued.push(id),
            }
        }

        if !released.is_empty() {
            info!(
                requeued = released.requeued.len(),
                failed = released.failed.len(),
                "released stale job claims"
            );
        }

        Ok(released)
    }

    async fn claim_notification(&self, job_id: Uuid) -> StoreResult<Option<Job>> {
        self.claim_notification_where(Some(job_id)).await
    }

    async fn claim_due_notification(&self) -> StoreResult<Option<Job>> {
        self.claim_notification_where(None).await
    }

    async fn mark_notified(&self, job_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET notified_at = NOW(),
                notify_error = NULL,
                updated_at = NOW()
            WHERE id = $1 AND notified_at IS NULL
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_notification_failure(&self, job_id: Uuid, error: &str) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET notify_error = $2, updated_at = NOW() WHERE id = $1")
            .bind(job_id)
            .bind(error)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn find_job(&self, job_id: Uuid) -> StoreResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(concat!(
            "SELECT ",
            job_columns!(),
            " FROM jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn list_jobs(&self, status: Option<JobStatus>, limit: i64) -> StoreResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(concat!(
            "SELECT ",
            job_columns!(),
            r#"
            FROM jobs
            WHERE ($1::job_status IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn retrigger(&self, job_id: Uuid) -> StoreResult<Uuid> {
        let mut tx = self.pool.begin().await?;

        let original = sqlx::query_as::<_, Job>(concat!(
            "SELECT ",
            job_columns!(),
            " FROM jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(job_id))?;

        if !original.is_terminal() {
            return Err(StoreError::NotTerminal(job_id));
        }

        let new_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO jobs (id, job_type, payload, max_attempts, root_job_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&original.job_type)
        .bind(&original.payload)
        .bind(original.max_attempts)
        .bind(original.root_job_id.unwrap_or(original.id))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(job_id = %new_id, root_job_id = %job_id, "job re-triggered");
        Ok(new_id)
    }
}
