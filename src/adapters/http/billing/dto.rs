//! HTTP DTOs for subscription endpoints.

use serde::{Deserialize, Serialize};

use crate::application::handlers::billing::{CancelSubscriptionResult, StartCheckoutResult};

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Response of `POST /api/subscriptions/subscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    /// Stripe-hosted checkout page.
    pub url: String,
}

impl From<StartCheckoutResult> for CheckoutResponse {
    fn from(result: StartCheckoutResult) -> Self {
        Self { url: result.url }
    }
}

/// Response of `POST /api/subscriptions/cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub subscription_id: String,
    pub cancel_at_period_end: bool,
    /// When access ends (RFC 3339).
    pub cancel_at: Option<String>,
}

impl From<CancelSubscriptionResult> for CancelResponse {
    fn from(result: CancelSubscriptionResult) -> Self {
        Self {
            subscription_id: result.subscription_id,
            cancel_at_period_end: result.cancellation.cancel_at_period_end,
            cancel_at: result
                .cancellation
                .cancel_at
                .map(|t| t.as_datetime().to_rfc3339()),
        }
    }
}

/// Error body shared by all endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
