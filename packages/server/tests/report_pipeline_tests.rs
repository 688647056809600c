//! End-to-end report pipeline: trigger, worker, report, email.

mod common;

use std::time::Duration;

use common::*;
use reviewiq_core::domains::reports::{
    dedup_key, DeliveryOutcome, DispatcherConfig, SubmitError, TriggerEvent,
};
use reviewiq_core::kernel::jobs::testing::InMemoryJobStore;
use reviewiq_core::kernel::jobs::{JobStatus, JobStore, StoreError, WorkOutcome};
use reviewiq_core::kernel::test_dependencies::{
    MockNotifier, MockReportGenerator, MockReviewScraper,
};
use reviewiq_core::kernel::{ScrapeError, TestDependencies};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn restaurant_report_completes_on_first_attempt() {
    init_tracing();
    let deps = TestDependencies::new()
        .mock_scraper(MockReviewScraper::new().with_delay(Duration::from_millis(50)))
        .mock_reports(MockReportGenerator::new().with_reference("R1"));
    let pipeline = TestPipeline::in_memory(deps);

    let job_id = pipeline
        .producer
        .submit(paid_checkout("cs_123", "restaurant-123"))
        .await
        .unwrap()
        .job_id();

    let outcome = pipeline.worker("w1").run_once().await.unwrap();
    assert_eq!(outcome, Some(WorkOutcome::Completed { job_id }));

    let job = pipeline.store.get(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.as_deref(), Some("R1"));
    assert_eq!(job.attempt_count, 1);
    assert!(job.notified_at.is_some());

    let sent = pipeline.deps.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].dedup_key, dedup_key(job_id));
    assert_eq!(sent[0].email.to, "owner@example.com");
    assert_eq!(sent[0].email.report_url, "R1");
    assert_eq!(sent[0].email.restaurant_name, "restaurant-123");

    let reports = pipeline.deps.reports.requests();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].report_id, job_id.to_string());
    assert_eq!(reports[0].reviews, MockReviewScraper::sample_output().reviews);
    assert_eq!(
        pipeline.deps.scraper.calls(),
        vec!["https://www.tripadvisor.com/Restaurant_Review-restaurant-123.html".to_string()]
    );
}

#[tokio::test]
async fn completed_job_is_notified_exactly_once() {
    let pipeline = TestPipeline::in_memory(TestDependencies::new());
    let job_id = pipeline
        .producer
        .submit(paid_checkout("cs_once", "Nautika"))
        .await
        .unwrap()
        .job_id();

    pipeline.worker("w1").run_once().await.unwrap();

    // Redelivery attempts from any path are no-ops.
    assert_eq!(
        pipeline.dispatcher.deliver(job_id).await.unwrap(),
        DeliveryOutcome::AlreadyHandled
    );
    assert_eq!(pipeline.dispatcher.deliver_due().await.unwrap(), None);
    pipeline.worker("w2").run_once().await.unwrap();

    assert_eq!(pipeline.deps.notifier.sent_count(), 1);
    assert_eq!(pipeline.deps.scraper.call_count(), 1);
}

#[tokio::test]
async fn duplicate_trigger_creates_one_job() {
    let pipeline = TestPipeline::in_memory(TestDependencies::new());

    let first = pipeline
        .producer
        .submit(paid_checkout("cs_dup", "Nautika"))
        .await
        .unwrap();
    let second = pipeline
        .producer
        .submit(paid_checkout("cs_dup", "Nautika"))
        .await
        .unwrap();

    assert!(first.is_created());
    assert!(!second.is_created());
    assert_eq!(first.job_id(), second.job_id());
    assert_eq!(pipeline.store.jobs().len(), 1);

    let job = pipeline.store.get(first.job_id()).unwrap();
    assert_eq!(job.idempotency_key.as_deref(), Some("stripe:cs_dup"));
    assert_eq!(job.max_attempts, pipeline.max_attempts);
}

#[tokio::test]
async fn same_session_from_another_source_is_a_new_job() {
    let pipeline = TestPipeline::in_memory(TestDependencies::new());

    let paid = pipeline
        .producer
        .submit(paid_checkout("evt_1", "Nautika"))
        .await
        .unwrap();
    let manual = pipeline
        .producer
        .submit(TriggerEvent::manual_start("evt_1", payload("Nautika")))
        .await
        .unwrap();

    assert!(manual.is_created());
    assert_ne!(paid.job_id(), manual.job_id());
}

#[tokio::test]
async fn unpaid_and_expired_checkouts_are_rejected() {
    let pipeline = TestPipeline::in_memory(TestDependencies::new());

    let unpaid = TriggerEvent::checkout_completed("cs_unpaid", "unpaid", payload("Nautika"));
    assert!(matches!(
        pipeline.producer.submit(unpaid).await,
        Err(SubmitError::Rejected(_))
    ));

    let expired = TriggerEvent::checkout_expired("cs_expired", payload("Nautika"));
    assert!(matches!(
        pipeline.producer.submit(expired).await,
        Err(SubmitError::Rejected(_))
    ));

    let mut bad_url = payload("Nautika");
    bad_url.restaurant_url = "ftp://example.com/menu".to_string();
    assert!(matches!(
        pipeline
            .producer
            .submit(TriggerEvent::checkout_completed("cs_url", "paid", bad_url))
            .await,
        Err(SubmitError::Rejected(_))
    ));

    assert!(pipeline.store.jobs().is_empty());
}

#[tokio::test]
async fn failed_email_is_retried_without_rescraping() {
    let deps = TestDependencies::new().mock_notifier(MockNotifier::new().fail_next(2));
    let pipeline = TestPipeline::in_memory(deps);
    let job_id = pipeline
        .producer
        .submit(paid_checkout("cs_mail", "Nautika"))
        .await
        .unwrap()
        .job_id();

    let shutdown = CancellationToken::new();
    let worker = pipeline.worker("w1");
    let token = shutdown.clone();
    let running = tokio::spawn(async move { worker.run(token).await });

    eventually("report email to go out", || {
        pipeline.deps.notifier.sent_count() == 1
    })
    .await;
    shutdown.cancel();
    running.await.unwrap();

    let job = pipeline.store.get(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempt_count, 1);
    assert_eq!(job.notify_attempts, 3);
    assert!(job.notified_at.is_some());
    assert!(job.notify_error.is_none());
    assert_eq!(pipeline.deps.scraper.call_count(), 1);
}

#[tokio::test]
async fn delivery_gives_up_after_max_notify_attempts() {
    let deps = TestDependencies::new().mock_notifier(MockNotifier::new().fail_next(100));
    let pipeline = TestPipeline::in_memory(deps);
    let job_id = pipeline
        .producer
        .submit(paid_checkout("cs_bounce", "Nautika"))
        .await
        .unwrap()
        .job_id();

    pipeline.worker("w1").run_once().await.unwrap();
    while pipeline.dispatcher.deliver_due().await.unwrap().is_some() {}

    let job = pipeline.store.get(job_id).unwrap();
    let max = pipeline.store.settings().max_notify_attempts;
    assert_eq!(job.notify_attempts, max);
    assert!(job.notified_at.is_none());
    assert_eq!(
        job.notify_error.as_deref(),
        Some("email provider unavailable")
    );
    // The job itself stays completed.
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn slow_notifier_does_not_block_completion() {
    let deps = TestDependencies::new()
        .mock_notifier(MockNotifier::new().with_delay(Duration::from_millis(500)));
    let pipeline = TestPipeline::with_dispatcher_config(
        Arc::new(InMemoryJobStore::with_settings(fast_settings())),
        deps,
        DispatcherConfig {
            notify_timeout: Duration::from_millis(20),
            ..DispatcherConfig::default()
        },
    );
    let job_id = pipeline
        .producer
        .submit(paid_checkout("cs_slow", "Nautika"))
        .await
        .unwrap()
        .job_id();

    let outcome = pipeline.worker("w1").run_once().await.unwrap();
    assert_eq!(outcome, Some(WorkOutcome::Completed { job_id }));

    let job = pipeline.store.get(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.notified_at.is_none());
    assert!(job.notify_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn report_failure_retries_the_job() {
    let deps = TestDependencies::new();
    deps.reports.set_failing(true);
    let pipeline = TestPipeline::in_memory(deps);
    let job_id = pipeline
        .producer
        .submit(paid_checkout("cs_report", "Nautika"))
        .await
        .unwrap()
        .job_id();

    let worker = pipeline.worker("w1");
    assert!(matches!(
        worker.run_once().await.unwrap(),
        Some(WorkOutcome::Retrying { .. })
    ));
    assert_eq!(pipeline.deps.notifier.sent_count(), 0);

    pipeline.deps.reports.set_failing(false);
    assert_eq!(
        worker.run_once().await.unwrap(),
        Some(WorkOutcome::Completed { job_id })
    );
    // Both attempts wrote to the same report id.
    let ids: Vec<String> = pipeline
        .deps
        .reports
        .requests()
        .into_iter()
        .map(|r| r.report_id)
        .collect();
    assert_eq!(ids, vec![job_id.to_string(), job_id.to_string()]);
    assert_eq!(pipeline.deps.notifier.sent_count(), 1);
}

#[tokio::test]
async fn retrigger_runs_a_failed_report_again() {
    let deps = TestDependencies::new().mock_scraper(
        MockReviewScraper::new().then_return(Err(ScrapeError::AccessDenied(403))),
    );
    let pipeline = TestPipeline::in_memory(deps);
    let original = pipeline
        .producer
        .submit(paid_checkout("cs_retry", "Nautika"))
        .await
        .unwrap()
        .job_id();

    let worker = pipeline.worker("w1");
    assert_eq!(
        worker.run_once().await.unwrap(),
        Some(WorkOutcome::Failed { job_id: original })
    );

    let copy = pipeline.store.retrigger(original).await.unwrap();
    assert_ne!(copy, original);
    assert!(matches!(
        pipeline.store.retrigger(copy).await,
        Err(StoreError::NotTerminal(id)) if id == copy
    ));

    assert_eq!(
        worker.run_once().await.unwrap(),
        Some(WorkOutcome::Completed { job_id: copy })
    );

    let job = pipeline.store.find_job(copy).await.unwrap().unwrap();
    assert_eq!(job.root_job_id, Some(original));
    assert_eq!(job.attempt_count, 1);
    assert_eq!(
        pipeline.deps.notifier.sent()[0].dedup_key,
        dedup_key(copy)
    );

    let failed = pipeline
        .store
        .list_jobs(Some(JobStatus::Failed), 10)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, original);
}
