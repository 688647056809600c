//! Test fixtures for trigger events and jobs.

use reviewiq_core::domains::reports::{ScrapeReportPayload, TriggerEvent, SCRAPE_AND_REPORT};
use reviewiq_core::kernel::jobs::NewJob;

pub fn payload(restaurant: &str) -> ScrapeReportPayload {
    ScrapeReportPayload {
        order_id: format!("order-{restaurant}"),
        email: "owner@example.com".to_string(),
        restaurant_url: format!("https://www.tripadvisor.com/Restaurant_Review-{restaurant}.html"),
        restaurant_name: restaurant.to_string(),
    }
}

/// A paid checkout for `restaurant`, identified by `session_id`.
pub fn paid_checkout(session_id: &str, restaurant: &str) -> TriggerEvent {
    TriggerEvent::checkout_completed(session_id, "paid", payload(restaurant))
}

/// A report job that skips the producer.
pub fn report_job(restaurant: &str, max_attempts: i32) -> NewJob {
    NewJob::builder()
        .job_type(SCRAPE_AND_REPORT)
        .payload(serde_json::to_value(payload(restaurant)).unwrap())
        .max_attempts(max_attempts)
        .build()
}
