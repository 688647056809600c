// TestDependencies - mock implementations for testing
//
// Provides mock collaborators that can be injected into the report handler
// and dispatcher for tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    BaseNotifier, BaseReportGenerator, BaseReviewScraper, ReportEmail, ReportRequest, Review,
    ScrapeError, ScrapeOutput, ScrapeRequest,
};

// =============================================================================
// Mock Review Scraper
// =============================================================================

pub struct MockReviewScraper {
    /// Returned in order; once drained, `fallback` is used
    scripted: Arc<Mutex<VecDeque<Result<ScrapeOutput, ScrapeError>>>>,
    fallback: Arc<Mutex<Result<ScrapeOutput, ScrapeError>>>,
    delay: Duration,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Default for MockReviewScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl MockReviewScraper {
    /// Always succeeds with a single five-star review
    pub fn new() -> Self {
        Self {
            scripted: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(Mutex::new(Ok(Self::sample_output()))),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sample_output() -> ScrapeOutput {
        ScrapeOutput {
            reviews: vec![Review {
                username: "Ana K".to_string(),
                location: Some("Zagreb, Croatia".to_string()),
                rating: 5.0,
                date: Some("June 2024".to_string()),
                text: "Great fish, friendly staff.".to_string(),
            }],
            pages_fetched: 1,
        }
    }

    /// Queue a one-off result
    pub fn then_return(self, result: Result<ScrapeOutput, ScrapeError>) -> Self {
        self.scripted.lock().unwrap().push_back(result);
        self
    }

    /// Fail every call not covered by a queued result
    pub fn always_fail(self, error: ScrapeError) -> Self {
        *self.fallback.lock().unwrap() = Err(error);
        self
    }

    /// Simulate a slow upstream
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl BaseReviewScraper for MockReviewScraper {
    async fn scrape(&self, request: &ScrapeRequest) -> Result<ScrapeOutput, ScrapeError> {
        self.calls.lock().unwrap().push(request.url.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.scripted.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => self.fallback.lock().unwrap().clone(),
        }
    }
}

// =============================================================================
// Mock Report Generator
// =============================================================================

pub struct MockReportGenerator {
    /// Fixed reference to return; defaults to `report://<report_id>`
    reference: Option<String>,
    failing: Arc<Mutex<bool>>,
    requests: Arc<Mutex<Vec<ReportRequest>>>,
}

impl Default for MockReportGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockReportGenerator {
    pub fn new() -> Self {
        Self {
            reference: None,
            failing: Arc::new(Mutex::new(false)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn requests(&self) -> Vec<ReportRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseReportGenerator for MockReportGenerator {
    async fn generate(&self, request: &ReportRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());

        if *self.failing.lock().unwrap() {
            anyhow::bail!("report storage unavailable");
        }

        Ok(self
            .reference
            .clone()
            .unwrap_or_else(|| format!("report://{}", request.report_id)))
    }
}

// =============================================================================
// Mock Notifier
// =============================================================================

/// A captured `send` call
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub email: ReportEmail,
    pub dedup_key: String,
}

pub struct MockNotifier {
    sent: Arc<Mutex<Vec<SentEmail>>>,
    /// Number of upcoming calls that fail
    failures_left: Arc<Mutex<usize>>,
    delay: Duration,
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            failures_left: Arc::new(Mutex::new(0)),
            delay: Duration::ZERO,
        }
    }

    /// Fail the next `count` calls
    pub fn fail_next(self, count: usize) -> Self {
        *self.failures_left.lock().unwrap() = count;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Successful sends only
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl BaseNotifier for MockNotifier {
    async fn send(&self, email: &ReportEmail, dedup_key: &str) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        {
            let mut failures_left = self.failures_left.lock().unwrap();
            if *failures_left > 0 {
                *failures_left -= 1;
                anyhow::bail!("email provider unavailable");
            }
        }

        self.sent.lock().unwrap().push(SentEmail {
            email: email.clone(),
            dedup_key: dedup_key.to_string(),
        });
        Ok(())
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

#[derive(Clone)]
pub struct TestDependencies {
    pub scraper: Arc<MockReviewScraper>,
    pub reports: Arc<MockReportGenerator>,
    pub notifier: Arc<MockNotifier>,
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            scraper: Arc::new(MockReviewScraper::new()),
            reports: Arc::new(MockReportGenerator::new()),
            notifier: Arc::new(MockNotifier::new()),
        }
    }

    /// Set a mock review scraper
    pub fn mock_scraper(mut self, scraper: MockReviewScraper) -> Self {
        self.scraper = Arc::new(scraper);
        self
    }

    /// Set a mock report generator
    pub fn mock_reports(mut self, reports: MockReportGenerator) -> Self {
        self.reports = Arc::new(reports);
        self
    }

    /// Set a mock notifier
    pub fn mock_notifier(mut self, notifier: MockNotifier) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }
}
