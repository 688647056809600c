//! Durable background job queue.
//!
//! - [`JobStore`] - atomic job transitions; [`PostgresJobStore`] in production,
//!   [`testing::InMemoryJobStore`] in tests
//! - [`JobWorker`] - claims one job at a time and runs its [`JobHandler`]
//! - [`JobRunner`] - N workers plus the stale-claim reaper
//!
//! # Lifecycle
//!
//! ```text
//! enqueue ──► pending ──claim_next──► running ──mark_completed──► completed
//!                ▲                      │
//!                └── retryable failure ─┤
//!                    or stale claim     └──── permanent failure / out of attempts ──► failed
//! ```

mod error;
mod job;
mod job_store;
mod queue;
mod runner;
pub mod testing;
mod worker;

pub use error::{JobError, StoreError, StoreResult};
pub use job::{ErrorKind, FailureOutcome, Job, JobStatus, NewJob, RetryPolicy};
pub use job_store::PostgresJobStore;
pub use queue::{EnqueueResult, JobStore, ReleasedClaims, StoreSettings};
pub use runner::{JobRunner, JobRunnerConfig, RunnerHandle};
pub use worker::{JobHandler, JobWorker, JobWorkerConfig, WorkOutcome};
