//! WebhookEventRepository port - Tracks processed Stripe webhook events.
//!
//! Stripe delivers at least once and retries on its own schedule, so the same
//! event id can arrive several times. Recording each processed id lets a
//! redelivery be skipped before any state is touched. This is the coarse
//! layer; the event applier stays idempotent on its own because the same
//! logical change can also arrive under different event ids.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::domain::foundation::DomainError;

/// How a webhook event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingResult {
    Success,
    Ignored,
    Failed,
}

impl ProcessingResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingResult::Success => "success",
            ProcessingResult::Ignored => "ignored",
            ProcessingResult::Failed => "failed",
        }
    }

    /// Parses a stored value; unknown values are read as failures.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "success" => ProcessingResult::Success,
            "ignored" => ProcessingResult::Ignored,
            _ => ProcessingResult::Failed,
        }
    }
}

impl fmt::Display for ProcessingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a processed webhook event.
#[derive(Debug, Clone)]
pub struct WebhookEventRecord {
    /// Stripe event ID (evt_xxx format).
    pub event_id: String,

    /// Type of Stripe event (e.g., "checkout.session.completed").
    pub event_type: String,

    /// Endpoint the event was delivered to.
    pub category: String,

    pub processed_at: DateTime<Utc>,

    pub result: ProcessingResult,

    /// Reason for ignored events, error for failed ones.
    pub error_message: Option<String>,

    /// Original event payload for debugging.
    pub payload: serde_json::Value,
}

impl WebhookEventRecord {
    fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        category: impl Into<String>,
        result: ProcessingResult,
        error_message: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            category: category.into(),
            processed_at: Utc::now(),
            result,
            error_message,
            payload,
        }
    }

    pub fn success(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        category: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(event_id, event_type, category, ProcessingResult::Success, None, payload)
    }

    pub fn ignored(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        category: impl Into<String>,
        reason: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(
            event_id,
            event_type,
            category,
            ProcessingResult::Ignored,
            Some(reason.into()),
            payload,
        )
    }

    pub fn failed(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        category: impl Into<String>,
        error: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(
            event_id,
            event_type,
            category,
            ProcessingResult::Failed,
            Some(error.into()),
            payload,
        )
    }
}

/// Result of attempting to insert a uniquely-keyed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// Record was inserted.
    Inserted,
    /// A record with the same key already exists.
    AlreadyExists,
}

/// Port for storing and retrieving processed webhook events.
///
/// Implementations must key on the event id (PRIMARY KEY) so two concurrent
/// deliveries of one event cannot both insert.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Find a previously processed event by its Stripe event ID.
    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError>;

    /// Insert a record with `ON CONFLICT DO NOTHING` semantics.
    async fn save(&self, record: WebhookEventRecord) -> Result<SaveResult, DomainError>;

    /// Delete records processed before `timestamp`, returning how many went.
    async fn delete_before(&self, timestamp: DateTime<Utc>) -> Result<u64, DomainError>;
}
