//! Wiring of the report pipeline over mock collaborators.

use std::sync::Arc;
use std::time::Duration;

use reviewiq_core::domains::reports::{
    DispatcherConfig, OutcomeDispatcher, ReportProducer, ScrapeReportHandler,
};
use reviewiq_core::kernel::jobs::{
    testing::InMemoryJobStore, JobStore, JobWorker, JobWorkerConfig, RetryPolicy, StoreSettings,
};
use reviewiq_core::kernel::TestDependencies;

/// Store settings with no backoff between attempts or deliveries.
pub fn fast_settings() -> StoreSettings {
    StoreSettings {
        retry: RetryPolicy::immediate(),
        notify_retry: RetryPolicy::immediate(),
        ..StoreSettings::default()
    }
}

/// Worker config that polls quickly, for tests that run the loop.
pub fn fast_worker_config(worker_id: &str) -> JobWorkerConfig {
    JobWorkerConfig {
        poll_interval: Duration::from_millis(10),
        heartbeat_interval: Duration::from_millis(20),
        error_backoff: Duration::from_millis(10),
        max_error_backoff: Duration::from_millis(40),
        ..JobWorkerConfig::with_worker_id(worker_id)
    }
}

pub struct TestPipeline<S: JobStore + 'static> {
    pub store: Arc<S>,
    pub deps: TestDependencies,
    pub dispatcher: Arc<OutcomeDispatcher>,
    pub producer: ReportProducer,
    pub max_attempts: i32,
}

impl TestPipeline<InMemoryJobStore> {
    pub fn in_memory(deps: TestDependencies) -> Self {
        Self::new(Arc::new(InMemoryJobStore::with_settings(fast_settings())), deps)
    }
}

impl<S: JobStore + 'static> TestPipeline<S> {
    pub fn new(store: Arc<S>, deps: TestDependencies) -> Self {
        Self::with_dispatcher_config(store, deps, DispatcherConfig::default())
    }

    pub fn with_dispatcher_config(
        store: Arc<S>,
        deps: TestDependencies,
        config: DispatcherConfig,
    ) -> Self {
        let dyn_store: Arc<dyn JobStore> = store.clone();
        let dispatcher = Arc::new(OutcomeDispatcher::new(
            dyn_store.clone(),
            deps.reports.clone(),
            deps.notifier.clone(),
            config,
        ));
        let max_attempts = 3;

        Self {
            producer: ReportProducer::new(dyn_store, max_attempts),
            store,
            deps,
            dispatcher,
            max_attempts,
        }
    }

    pub fn handler(&self) -> ScrapeReportHandler {
        ScrapeReportHandler::new(self.deps.scraper.clone(), self.dispatcher.clone(), 100)
    }

    pub fn worker(&self, worker_id: &str) -> JobWorker {
        self.worker_with(fast_worker_config(worker_id))
    }

    pub fn worker_with(&self, config: JobWorkerConfig) -> JobWorker {
        let store: Arc<dyn JobStore> = self.store.clone();
        JobWorker::new(store, config).with_handler(Arc::new(self.handler()))
    }
}

/// Poll `check` until it holds, panicking after five seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
