//! Kernel module - job queue infrastructure and external dependencies.

pub mod jobs;
pub mod report_generator;
pub mod resend_notifier;
pub mod review_scraper;
pub mod test_dependencies;
pub mod traits;

pub use report_generator::{HtmlReportGenerator, ReportStats};
pub use resend_notifier::{LogNotifier, ResendNotifier};
pub use review_scraper::HttpReviewScraper;
pub use test_dependencies::TestDependencies;
pub use traits::*;
