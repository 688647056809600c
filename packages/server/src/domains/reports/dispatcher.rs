//! Outcome dispatcher: report artifact and customer notification.
//!
//! The report is produced inside the job attempt, so a job only reaches
//! `completed` once its artifact exists. The email is a separate delivery
//! step tracked on the job row (`notified_at`, `notify_attempts`) and
//! retried on its own schedule; a failed email never re-runs the scrape.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{DeliveryOutcome, ScrapeReportPayload};
use crate::kernel::jobs::{Job, JobError, JobStore, StoreResult};
use crate::kernel::{BaseNotifier, BaseReportGenerator, ReportEmail, ReportRequest, ScrapeOutput};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on a single notifier call
    pub notify_timeout: Duration,
    /// How long the report link stays valid
    pub report_expiry: chrono::Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            notify_timeout: Duration::from_secs(30),
            report_expiry: chrono::Duration::days(90),
        }
    }
}

/// Deduplication key for the report email of a job.
pub fn dedup_key(job_id: Uuid) -> String {
    format!("report-email:{job_id}")
}

pub struct OutcomeDispatcher {
    store: Arc<dyn JobStore>,
    reports: Arc<dyn BaseReportGenerator>,
    notifier: Arc<dyn BaseNotifier>,
    config: DispatcherConfig,
}

impl OutcomeDispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        reports: Arc<dyn BaseReportGenerator>,
        notifier: Arc<dyn BaseNotifier>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            reports,
            notifier,
            config,
        }
    }

    /// Write the report for a finished scrape and return its reference.
    ///
    /// The report id is the job id, so a retried attempt overwrites the
    /// artifact of an earlier one instead of creating a second report.
    pub async fn produce_report(
        &self,
        job: &Job,
        payload: &ScrapeReportPayload,
        output: ScrapeOutput,
    ) -> Result<String, JobError> {
        let request = ReportRequest {
            report_id: job.id.to_string(),
            restaurant_name: payload.restaurant_name.clone(),
            restaurant_url: payload.restaurant_url.clone(),
            reviews: output.reviews,
        };

        let reference = self
            .reports
            .generate(&request)
            .await
            .map_err(|e| JobError::transient(format!("report generation failed: {e:#}")))?;

        debug!(job_id = %job.id, reference = %reference, "report produced");
        Ok(reference)
    }

    /// Deliver the report email of a completed job.
    ///
    /// Safe to call any number of times: the delivery is claimed atomically
    /// in the store, so a job that was already notified, or whose delivery is
    /// in flight or backing off, is left alone.
    pub async fn deliver(&self, job_id: Uuid) -> StoreResult<DeliveryOutcome> {
        match self.store.claim_notification(job_id).await? {
            Some(job) => self.send_claimed(job).await,
            None => {
                debug!(job_id = %job_id, "delivery not due");
                Ok(DeliveryOutcome::AlreadyHandled)
            }
        }
    }

    /// Retry one due delivery, if any.
    pub async fn deliver_due(&self) -> StoreResult<Option<DeliveryOutcome>> {
        match self.store.claim_due_notification().await? {
            Some(job) => self.send_claimed(job).await.map(Some),
            None => Ok(None),
        }
    }

    async fn send_claimed(&self, job: Job) -> StoreResult<DeliveryOutcome> {
        let payload: ScrapeReportPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => return self.record_failure(&job, format!("invalid payload: {e}")).await,
        };

        let completed_at = job.completed_at.unwrap_or_else(Utc::now);
        let email = ReportEmail {
            to: payload.email,
            restaurant_name: payload.restaurant_name,
            report_url: job.result.clone().unwrap_or_default(),
            expires_at: completed_at + self.config.report_expiry,
        };
        let key = dedup_key(job.id);

        let sent = tokio::time::timeout(self.config.notify_timeout, self.notifier.send(&email, &key)).await;
        match sent {
            Ok(Ok(())) => {
                self.store.mark_notified(job.id).await?;
                info!(job_id = %job.id, attempt = job.notify_attempts, "report email delivered");
                Ok(DeliveryOutcome::Sent)
            }
            Ok(Err(e)) => self.record_failure(&job, format!("{e:#}")).await,
            Err(_) => {
                self.record_failure(
                    &job,
                    format!("notifier timed out after {:?}", self.config.notify_timeout),
                )
                .await
            }
        }
    }

    async fn record_failure(&self, job: &Job, error: String) -> StoreResult<DeliveryOutcome> {
        warn!(
            job_id = %job.id,
            attempt = job.notify_attempts,
            error = %error,
            "report email delivery failed"
        );
        self.store.record_notification_failure(job.id, &error).await?;
        Ok(DeliveryOutcome::Failed { error })
    }
}
