//! Turns confirmed trigger events into `scrape_and_report` jobs.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use super::models::{ScrapeReportPayload, TriggerEvent, TriggerKind};
use super::SCRAPE_AND_REPORT;
use crate::kernel::jobs::{EnqueueResult, JobStore, NewJob, StoreError};

/// Name used when the customer left the restaurant name blank
const DEFAULT_RESTAURANT_NAME: &str = "Restaurant";

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The event does not qualify for a job; retrying it will not help
    #[error("trigger rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ReportProducer {
    store: Arc<dyn JobStore>,
    max_attempts: i32,
}

impl ReportProducer {
    pub fn new(store: Arc<dyn JobStore>, max_attempts: i32) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    /// Validate the event and enqueue exactly one job for it.
    ///
    /// Redelivery of an already-accepted event returns
    /// `EnqueueResult::Duplicate` with the original job id.
    pub async fn submit(&self, event: TriggerEvent) -> Result<EnqueueResult, SubmitError> {
        if let Err(e) = validate(&event) {
            warn!(source = %event.source, event_id = %event.event_id, error = %e, "trigger rejected");
            return Err(e);
        }

        let key = event.idempotency_key();
        let payload = normalize(event.payload);
        let job = NewJob::builder()
            .job_type(SCRAPE_AND_REPORT)
            .payload(serde_json::to_value(&payload).map_err(StoreError::from)?)
            .idempotency_key(key.clone())
            .max_attempts(self.max_attempts)
            .build();

        let result = self.store.enqueue(job).await?;
        match result {
            EnqueueResult::Created(job_id) => {
                info!(job_id = %job_id, order_id = %payload.order_id, idempotency_key = %key, "report job queued")
            }
            EnqueueResult::Duplicate(job_id) => {
                info!(job_id = %job_id, idempotency_key = %key, "duplicate trigger ignored")
            }
        }
        Ok(result)
    }
}

fn validate(event: &TriggerEvent) -> Result<(), SubmitError> {
    match &event.kind {
        TriggerKind::CheckoutCompleted { payment_status } if payment_status != "paid" => {
            return Err(SubmitError::Rejected(format!(
                "checkout not paid (payment status {payment_status})"
            )));
        }
        TriggerKind::CheckoutExpired => {
            return Err(SubmitError::Rejected("checkout session expired".to_string()));
        }
        _ => {}
    }

    if event.event_id.trim().is_empty() {
        return Err(SubmitError::Rejected("missing event id".to_string()));
    }
    if event.payload.order_id.trim().is_empty() {
        return Err(SubmitError::Rejected("missing order id".to_string()));
    }
    if !is_valid_email(&event.payload.email) {
        return Err(SubmitError::Rejected(format!(
            "invalid email address: {}",
            event.payload.email
        )));
    }
    if !is_valid_target(&event.payload.restaurant_url) {
        return Err(SubmitError::Rejected(format!(
            "invalid restaurant url: {}",
            event.payload.restaurant_url
        )));
    }

    Ok(())
}

fn normalize(mut payload: ScrapeReportPayload) -> ScrapeReportPayload {
    payload.email = payload.email.trim().to_string();
    payload.restaurant_url = payload.restaurant_url.trim().to_string();
    payload.restaurant_name = payload.restaurant_name.trim().to_string();
    if payload.restaurant_name.is_empty() {
        payload.restaurant_name = DEFAULT_RESTAURANT_NAME.to_string();
    }
    payload
}

fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

fn is_valid_target(url: &str) -> bool {
    Url::parse(url.trim())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}
