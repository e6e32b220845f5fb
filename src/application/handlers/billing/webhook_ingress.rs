//! WebhookIngress - Verifies a delivery against its category's secret and
//! hands it to the idempotent processor.
//!
//! Every outcome ends here as a log line. The HTTP route has already
//! acknowledged the delivery by the time this runs.

use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PaymentConfig;
use crate::domain::billing::{
    EventCategory, IdempotentWebhookProcessor, LifecycleEventHandler, StripeWebhookVerifier,
    WebhookError, WebhookResult,
};
use crate::ports::WebhookEventRepository;

/// Signing secret per webhook endpoint.
#[derive(Debug, Clone)]
pub struct WebhookSecrets {
    pub subscribed: SecretString,
    pub payment_succeeded: SecretString,
    pub updated: SecretString,
}

impl WebhookSecrets {
    pub fn from_config(config: &PaymentConfig) -> Self {
        Self {
            subscribed: SecretString::new(config.webhook_secret_subscribed.clone()),
            payment_succeeded: SecretString::new(config.webhook_secret_payment_succeeded.clone()),
            updated: SecretString::new(config.webhook_secret_updated.clone()),
        }
    }

    fn for_category(&self, category: EventCategory) -> SecretString {
        match category {
            EventCategory::Subscribed => self.subscribed.clone(),
            EventCategory::PaymentSucceeded => self.payment_succeeded.clone(),
            EventCategory::Updated => self.updated.clone(),
        }
    }
}

pub struct WebhookIngress {
    verifiers: HashMap<EventCategory, StripeWebhookVerifier>,
    processor: IdempotentWebhookProcessor,
}

impl WebhookIngress {
    pub fn new(
        secrets: WebhookSecrets,
        repository: Arc<dyn WebhookEventRepository>,
        handler: Arc<dyn LifecycleEventHandler>,
    ) -> Self {
        let verifiers = EventCategory::ALL
            .into_iter()
            .map(|category| {
                (
                    category,
                    StripeWebhookVerifier::new(secrets.for_category(category)),
                )
            })
            .collect();

        Self {
            verifiers,
            processor: IdempotentWebhookProcessor::new(repository, handler),
        }
    }

    /// Ignore test-mode events.
    pub fn with_require_livemode(mut self, require_livemode: bool) -> Self {
        self.processor = self.processor.with_require_livemode(require_livemode);
        self
    }

    /// Verifies, decodes and applies one delivery.
    ///
    /// A delivery that fails verification is dropped without touching any
    /// state.
    pub async fn receive(
        &self,
        category: EventCategory,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookResult, WebhookError> {
        let Some(signature) = signature else {
            tracing::warn!(%category, "Webhook without Stripe-Signature header dropped");
            return Err(WebhookError::MissingSignature);
        };

        let verifier = self
            .verifiers
            .get(&category)
            .ok_or_else(|| WebhookError::ParseError(format!("no verifier for {}", category)))?;

        let event = match verifier.verify_and_parse(body, signature) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(%category, error = %e, "Webhook verification failed; dropped");
                return Err(e);
            }
        };

        let event_id = event.id.clone();
        let event_type = event.event_type.clone();
        let result = self.processor.process(category, event).await;

        match &result {
            Ok(WebhookResult::Processed(outcome)) => {
                tracing::info!(%category, event_id, event_type, ?outcome, "Webhook processed");
            }
            Ok(WebhookResult::Ignored(reason)) => {
                tracing::info!(%category, event_id, event_type, reason, "Webhook ignored");
            }
            Ok(WebhookResult::AlreadyProcessed) => {
                tracing::debug!(%category, event_id, "Webhook already processed");
            }
            Err(e) if e.is_retryable() => {
                tracing::error!(%category, event_id, event_type, error = %e, "Webhook failed; left unrecorded for redelivery");
            }
            Err(e) => {
                tracing::error!(%category, event_id, event_type, error = %e, "Webhook failed");
            }
        }

        result
    }
}
