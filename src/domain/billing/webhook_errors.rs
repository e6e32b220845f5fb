//! Webhook error types for Stripe webhook handling.
//!
//! None of these ever reach the HTTP response: the ingress acknowledges every
//! delivery and these errors end at the log line and the event record.

use thiserror::Error;

use crate::domain::foundation::DomainError;

/// Errors that occur during webhook processing.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Webhook signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Stripe-Signature header was not sent.
    #[error("Missing signature header")]
    MissingSignature,

    /// Webhook timestamp is outside the acceptable window (5 minutes).
    #[error("Timestamp out of range")]
    TimestampOutOfRange,

    /// Event timestamp is in the future beyond clock skew tolerance.
    #[error("Invalid timestamp")]
    InvalidTimestamp,

    /// Failed to parse webhook payload or signature header.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Required metadata field missing from webhook event.
    #[error("Missing metadata: {0}")]
    MissingMetadata(&'static str),

    /// Required field missing from webhook payload.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Event was intentionally ignored (not an error condition).
    #[error("Event ignored: {0}")]
    Ignored(String),

    /// Payment processor call failed.
    #[error("Payment provider error: {0}")]
    Provider(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A CRM write failed after local state was committed.
    ///
    /// Not retryable: earlier steps of the chain may already exist remotely.
    #[error("CRM error: {0}")]
    Crm(String),
}

impl WebhookError {
    /// True for failures that may succeed if the same event is processed again.
    ///
    /// Retryable failures are not written to the event record, so a manual
    /// redelivery from the Stripe dashboard is processed instead of skipped.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WebhookError::Database(_) | WebhookError::Provider(_))
    }

    /// True when the delivery failed authentication and must be dropped.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            WebhookError::InvalidSignature
                | WebhookError::MissingSignature
                | WebhookError::TimestampOutOfRange
                | WebhookError::InvalidTimestamp
        )
    }
}

impl From<DomainError> for WebhookError {
    fn from(err: DomainError) -> Self {
        WebhookError::Database(err.to_string())
    }
}
