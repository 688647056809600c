use serde::{Deserialize, Serialize};

/// Payload of a `scrape_and_report` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeReportPayload {
    pub order_id: String,
    /// Recipient of the report email
    pub email: String,
    pub restaurant_url: String,
    pub restaurant_name: String,
}

/// What fired the trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerKind {
    /// Checkout session completed; only `paid` sessions are enqueued
    CheckoutCompleted { payment_status: String },
    /// Checkout session expired before payment
    CheckoutExpired,
    /// Operator-initiated scrape without payment
    ManualStart,
}

/// An external event that may enqueue a report job.
///
/// `source` and `event_id` together identify the delivery; redelivery of the
/// same event is collapsed onto the first job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub source: String,
    pub event_id: String,
    pub kind: TriggerKind,
    pub payload: ScrapeReportPayload,
}

impl TriggerEvent {
    pub fn checkout_completed(
        session_id: impl Into<String>,
        payment_status: impl Into<String>,
        payload: ScrapeReportPayload,
    ) -> Self {
        Self {
            source: "stripe".to_string(),
            event_id: session_id.into(),
            kind: TriggerKind::CheckoutCompleted {
                payment_status: payment_status.into(),
            },
            payload,
        }
    }

    pub fn checkout_expired(session_id: impl Into<String>, payload: ScrapeReportPayload) -> Self {
        Self {
            source: "stripe".to_string(),
            event_id: session_id.into(),
            kind: TriggerKind::CheckoutExpired,
            payload,
        }
    }

    pub fn manual_start(request_id: impl Into<String>, payload: ScrapeReportPayload) -> Self {
        Self {
            source: "manual".to_string(),
            event_id: request_id.into(),
            kind: TriggerKind::ManualStart,
            payload,
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.source, self.event_id)
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// Already delivered, in flight elsewhere, not yet due, or not completed
    AlreadyHandled,
    Failed { error: String },
}
