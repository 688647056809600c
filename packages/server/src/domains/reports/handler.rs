use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use super::dispatcher::OutcomeDispatcher;
use super::models::ScrapeReportPayload;
use super::SCRAPE_AND_REPORT;
use crate::kernel::jobs::{Job, JobError, JobHandler};
use crate::kernel::{BaseReviewScraper, ScrapeError, ScrapeRequest};

impl From<ScrapeError> for JobError {
    fn from(error: ScrapeError) -> Self {
        if error.is_transient() {
            JobError::Transient(error.to_string())
        } else {
            JobError::Permanent(error.to_string())
        }
    }
}

/// Runs a `scrape_and_report` job: scrape, write the report, then hand the
/// email to the dispatcher once the job is completed.
pub struct ScrapeReportHandler {
    scraper: Arc<dyn BaseReviewScraper>,
    dispatcher: Arc<OutcomeDispatcher>,
    max_reviews: usize,
}

impl ScrapeReportHandler {
    pub fn new(
        scraper: Arc<dyn BaseReviewScraper>,
        dispatcher: Arc<OutcomeDispatcher>,
        max_reviews: usize,
    ) -> Self {
        Self {
            scraper,
            dispatcher,
            max_reviews,
        }
    }
}

#[async_trait]
impl JobHandler for ScrapeReportHandler {
    fn job_type(&self) -> &'static str {
        SCRAPE_AND_REPORT
    }

    async fn execute(&self, job: &Job) -> Result<String, JobError> {
        let payload: ScrapeReportPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::permanent(format!("invalid payload: {e}")))?;

        let request = ScrapeRequest {
            url: payload.restaurant_url.clone(),
            max_reviews: self.max_reviews,
        };
        let output = self.scraper.scrape(&request).await?;

        debug!(
            job_id = %job.id,
            order_id = %payload.order_id,
            reviews = output.reviews.len(),
            "scrape finished"
        );

        self.dispatcher.produce_report(job, &payload, output).await
    }

    async fn after_completed(&self, job_id: Uuid) {
        if let Err(e) = self.dispatcher.deliver(job_id).await {
            warn!(job_id = %job_id, error = %e, "delivery deferred, store unavailable");
        }
    }

    async fn on_idle(&self) {
        if let Err(e) = self.dispatcher.deliver_due().await {
            warn!(error = %e, "delivery sweep failed");
        }
    }
}
