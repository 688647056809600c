// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Business logic (retry policy, delivery bookkeeping) lives in the jobs kernel
// and the reports domain, which use these traits.
//
// Naming convention: Base* for trait names (e.g., BaseReviewScraper, BaseNotifier)

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Review Scraper Trait (Infrastructure - external review site)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeRequest {
    pub url: String,
    /// Stop after this many reviews
    pub max_reviews: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub username: String,
    /// Reviewer's home location as shown on the profile, usually "City, Country"
    pub location: Option<String>,
    /// 1.0 - 5.0
    pub rating: f32,
    pub date: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeOutput {
    pub reviews: Vec<Review>,
    pub pages_fetched: usize,
}

/// Scrape failures, split by whether another attempt can help.
#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("upstream error: HTTP {0}")]
    Upstream(u16),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("access denied: HTTP {0}")]
    AccessDenied(u16),

    #[error("unparseable page: {0}")]
    Parse(String),
}

impl ScrapeError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScrapeError::Network(_) | ScrapeError::RateLimited | ScrapeError::Upstream(_)
        )
    }
}

#[async_trait]
pub trait BaseReviewScraper: Send + Sync {
    /// Fetch reviews for one restaurant page, following pagination
    async fn scrape(&self, request: &ScrapeRequest) -> std::result::Result<ScrapeOutput, ScrapeError>;
}

// =============================================================================
// Report Generator Trait (Infrastructure - report artifact storage)
// =============================================================================

#[derive(Debug, Clone)]
pub struct ReportRequest {
    /// Stable per job; regenerating with the same id overwrites the artifact
    pub report_id: String,
    pub restaurant_name: String,
    pub restaurant_url: String,
    pub reviews: Vec<Review>,
}

#[async_trait]
pub trait BaseReportGenerator: Send + Sync {
    /// Write the report and return its reference (a URL or path)
    async fn generate(&self, request: &ReportRequest) -> Result<String>;
}

// =============================================================================
// Notifier Trait (Infrastructure - transactional email)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEmail {
    pub to: String,
    pub restaurant_name: String,
    pub report_url: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait BaseNotifier: Send + Sync {
    /// Send the report email. Providers that support it deduplicate on `dedup_key`.
    async fn send(&self, email: &ReportEmail, dedup_key: &str) -> Result<()>;
}
