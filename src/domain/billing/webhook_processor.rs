//! Webhook processor - Orchestrates idempotent webhook event handling.
//!
//! ## Steps
//!
//! 1. Skip the event if its id was already recorded
//! 2. Decode it through the category table
//! 3. Hand the lifecycle event to the handler
//! 4. Record the result (success, ignored, or failed)
//!
//! ## Race Condition Handling
//!
//! When two deliveries of one event run at the same time both may pass step
//! 1. The applier is idempotent per operation, so both applying is harmless;
//! the first to save wins and the other reports `AlreadyProcessed`.
//!
//! Retryable failures (database, payment processor) are not recorded, so a
//! later redelivery of the same event id gets another attempt.

use async_trait::async_trait;
use std::sync::Arc;

use crate::ports::{SaveResult, WebhookEventRecord, WebhookEventRepository};

use super::lifecycle_event::{EventCategory, LifecycleEvent};
use super::stripe_event::StripeEvent;
use super::webhook_errors::WebhookError;

/// What applying one lifecycle event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new subscription record was written.
    SubscriptionCreated,
    /// The change was already applied; nothing written.
    DuplicateDelivery,
    /// Subscription status and `is_active` were updated.
    StatusUpdated,
    /// No local subscription has this external id; nothing written.
    SubscriptionNotFound,
    /// The CRM invoice chain was created.
    InvoiceRecorded,
    /// The user has no CRM contact or deal yet; nothing sent.
    LinkageMissing,
    /// No local user matches the event.
    UserNotFound,
}

/// Applies a decoded lifecycle event.
#[async_trait]
pub trait LifecycleEventHandler: Send + Sync {
    async fn handle(&self, event: &LifecycleEvent) -> Result<ApplyOutcome, WebhookError>;
}

/// Result of webhook processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookResult {
    /// Event was applied by the handler.
    Processed(ApplyOutcome),
    /// Event was acknowledged without being applied.
    Ignored(String),
    /// Event id was already recorded (idempotent skip).
    AlreadyProcessed,
}

/// Processes webhook events with idempotency guarantees.
pub struct IdempotentWebhookProcessor {
    repository: Arc<dyn WebhookEventRepository>,
    handler: Arc<dyn LifecycleEventHandler>,
    require_livemode: bool,
}

impl IdempotentWebhookProcessor {
    pub fn new(
        repository: Arc<dyn WebhookEventRepository>,
        handler: Arc<dyn LifecycleEventHandler>,
    ) -> Self {
        Self {
            repository,
            handler,
            require_livemode: false,
        }
    }

    /// Ignore test-mode events.
    pub fn with_require_livemode(mut self, require_livemode: bool) -> Self {
        self.require_livemode = require_livemode;
        self
    }

    /// Process a verified webhook event at most once per event id.
    ///
    /// # Returns
    ///
    /// - `Ok(Processed(_))` - the handler ran and the result was recorded
    /// - `Ok(Ignored(_))` - recorded as ignored, nothing applied
    /// - `Ok(AlreadyProcessed)` - the id was already recorded
    /// - `Err(_)` - processing failed (recorded unless retryable)
    pub async fn process(
        &self,
        category: EventCategory,
        event: StripeEvent,
    ) -> Result<WebhookResult, WebhookError> {
        if self.repository.find_by_event_id(&event.id).await?.is_some() {
            return Ok(WebhookResult::AlreadyProcessed);
        }

        let result = self.apply(category, &event).await;

        let payload = serde_json::to_value(&event)
            .map_err(|e| WebhookError::ParseError(format!("Failed to serialize event: {}", e)))?;
        let record = match &result {
            Ok(_) => Some(WebhookEventRecord::success(
                &event.id,
                &event.event_type,
                category.as_str(),
                payload,
            )),
            Err(WebhookError::Ignored(reason)) => Some(WebhookEventRecord::ignored(
                &event.id,
                &event.event_type,
                category.as_str(),
                reason,
                payload,
            )),
            Err(e) if e.is_retryable() => None,
            Err(e) => Some(WebhookEventRecord::failed(
                &event.id,
                &event.event_type,
                category.as_str(),
                e.to_string(),
                payload,
            )),
        };

        let Some(record) = record else {
            return result.map(WebhookResult::Processed);
        };

        match self.repository.save(record).await? {
            SaveResult::Inserted => match result {
                Ok(outcome) => Ok(WebhookResult::Processed(outcome)),
                Err(WebhookError::Ignored(reason)) => Ok(WebhookResult::Ignored(reason)),
                Err(e) => Err(e),
            },
            SaveResult::AlreadyExists => Ok(WebhookResult::AlreadyProcessed),
        }
    }

    async fn apply(
        &self,
        category: EventCategory,
        event: &StripeEvent,
    ) -> Result<ApplyOutcome, WebhookError> {
        if self.require_livemode && !event.livemode {
            return Err(WebhookError::Ignored("test-mode event".to_string()));
        }
        let lifecycle = category.decode(event)?;
        self.handler.handle(&lifecycle).await
    }
}
