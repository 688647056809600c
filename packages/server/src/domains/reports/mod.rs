//! Reports domain - paid review-analysis reports
//!
//! A confirmed checkout (or a manual start) enqueues one `scrape_and_report`
//! job. The worker scrapes the restaurant's reviews, the dispatcher writes the
//! report and, once the job is completed, emails the link to the customer.

pub mod dispatcher;
pub mod handler;
pub mod models;
pub mod producer;

/// Job type of the report pipeline
pub const SCRAPE_AND_REPORT: &str = "scrape_and_report";

pub use dispatcher::{dedup_key, DispatcherConfig, OutcomeDispatcher};
pub use handler::ScrapeReportHandler;
pub use models::{DeliveryOutcome, ScrapeReportPayload, TriggerEvent, TriggerKind};
pub use producer::{ReportProducer, SubmitError};
