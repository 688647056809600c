use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domains::reports::DispatcherConfig;
use crate::kernel::jobs::{JobRunnerConfig, JobWorkerConfig, RetryPolicy, StoreSettings};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Public origin used in report links
    pub base_url: String,
    pub reports_path: String,
    pub report_expiry_days: i64,
    /// Email delivery is logged instead of sent when unset
    pub resend_api_key: Option<String>,
    pub email_from: String,
    pub max_reviews: usize,
    pub queue: QueueConfig,
}

/// Job queue tuning. Loaded once; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub max_attempts: i32,
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub lease_duration: Duration,
    pub heartbeat_interval: Duration,
    pub reaper_interval: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub notify_timeout: Duration,
    pub notify_retry_base: Duration,
    pub notify_retry_max: Duration,
    pub notify_max_attempts: i32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            base_url: lookup("BASE_URL").unwrap_or_else(|| "http://localhost:8000".to_string()),
            reports_path: lookup("REPORTS_PATH").unwrap_or_else(|| "reports".to_string()),
            report_expiry_days: parse_or(&lookup, "REPORT_EXPIRY_DAYS", 90)?,
            resend_api_key: lookup("RESEND_API_KEY").filter(|key| !key.is_empty()),
            email_from: lookup("EMAIL_FROM")
                .unwrap_or_else(|| "ReviewIQ <info@reviewiq.hr>".to_string()),
            max_reviews: parse_or(&lookup, "MAX_REVIEWS", 500)?,
            queue: QueueConfig::from_lookup(&lookup)?,
        })
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            notify_timeout: self.queue.notify_timeout,
            report_expiry: chrono::Duration::days(self.report_expiry_days),
        }
    }
}

impl QueueConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let secs = |key: &str, default: u64| -> Result<Duration> {
            parse_or(lookup, key, default).map(Duration::from_secs)
        };

        let config = Self {
            max_attempts: parse_or(lookup, "JOB_MAX_ATTEMPTS", 3)?,
            worker_count: parse_or(lookup, "WORKER_COUNT", 1)?,
            poll_interval: secs("WORKER_POLL_INTERVAL_SECS", 5)?,
            job_timeout: secs("JOB_TIMEOUT_SECS", 30 * 60)?,
            lease_duration: secs("JOB_LEASE_SECS", 300)?,
            heartbeat_interval: secs("JOB_HEARTBEAT_SECS", 60)?,
            reaper_interval: secs("JOB_REAPER_INTERVAL_SECS", 60)?,
            retry_base: secs("JOB_RETRY_BASE_SECS", 30)?,
            retry_max: secs("JOB_RETRY_MAX_SECS", 3600)?,
            notify_timeout: secs("NOTIFY_TIMEOUT_SECS", 30)?,
            notify_retry_base: secs("NOTIFY_RETRY_BASE_SECS", 60)?,
            notify_retry_max: secs("NOTIFY_RETRY_MAX_SECS", 3600)?,
            notify_max_attempts: parse_or(lookup, "NOTIFY_MAX_ATTEMPTS", 5)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            anyhow::bail!("JOB_MAX_ATTEMPTS must be at least 1");
        }
        if self.worker_count < 1 {
            anyhow::bail!("WORKER_COUNT must be at least 1");
        }
        if self.poll_interval.is_zero() || self.heartbeat_interval.is_zero() {
            anyhow::bail!("WORKER_POLL_INTERVAL_SECS and JOB_HEARTBEAT_SECS must be positive");
        }
        if self.reaper_interval.is_zero() {
            anyhow::bail!("JOB_REAPER_INTERVAL_SECS must be positive");
        }
        // A lease that is never renewed in time gets reaped while the job still runs.
        if self.heartbeat_interval >= self.lease_duration {
            anyhow::bail!("JOB_HEARTBEAT_SECS must be shorter than JOB_LEASE_SECS");
        }
        if self.retry_max < self.retry_base {
            anyhow::bail!("JOB_RETRY_MAX_SECS must not be shorter than JOB_RETRY_BASE_SECS");
        }
        if self.notify_retry_max < self.notify_retry_base {
            anyhow::bail!("NOTIFY_RETRY_MAX_SECS must not be shorter than NOTIFY_RETRY_BASE_SECS");
        }
        // A claimed delivery stays invisible for one retry delay, which is
        // between the base and the cap.
        if self.notify_retry_base <= self.notify_timeout {
            anyhow::bail!("NOTIFY_RETRY_BASE_SECS must be longer than NOTIFY_TIMEOUT_SECS");
        }
        if self.notify_retry_max <= self.notify_timeout {
            anyhow::bail!("NOTIFY_RETRY_MAX_SECS must be longer than NOTIFY_TIMEOUT_SECS");
        }
        Ok(())
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            lease_duration: self.lease_duration,
            retry: RetryPolicy::new(self.retry_base, self.retry_max),
            notify_retry: RetryPolicy::new(self.notify_retry_base, self.notify_retry_max),
            max_notify_attempts: self.notify_max_attempts,
        }
    }

    pub fn worker_config(&self, worker_id: impl Into<String>) -> JobWorkerConfig {
        JobWorkerConfig {
            poll_interval: self.poll_interval,
            job_timeout: self.job_timeout,
            heartbeat_interval: self.heartbeat_interval,
            ..JobWorkerConfig::with_worker_id(worker_id)
        }
    }

    pub fn runner_config(&self) -> JobRunnerConfig {
        JobRunnerConfig {
            worker_count: self.worker_count,
            reaper_interval: self.reaper_interval,
            lease_timeout: self.lease_duration,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        None => Ok(default),
    }
}
