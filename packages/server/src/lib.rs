// ReviewIQ - Core
//
// Durable background job queue behind paid review-analysis reports.
// A checkout event enqueues a job, workers scrape and build the report,
// and the outcome dispatcher emails the link exactly once.
//
// Infrastructure lives in kernel/, business rules per-domain in domains/*

pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
