//! HTTP handlers for subscription and webhook endpoints.
//!
//! These handlers connect Axum routes to application layer command handlers
//! and to the webhook ingress.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Json, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::adapters::http::middleware::RequireAuth;
use crate::application::handlers::billing::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CheckoutSettings, StartCheckoutCommand,
    StartCheckoutHandler, WebhookIngress,
};
use crate::domain::billing::{BillingError, EventCategory};
use crate::ports::{LedgerStore, PaymentProvider};

use super::dto::{CancelResponse, CheckoutResponse, ErrorResponse};

/// Body of every webhook acknowledgment.
pub const WEBHOOK_ACK: &str = "Webhook received";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared state for billing routes.
#[derive(Clone)]
pub struct BillingAppState {
    pub ledger: Arc<dyn LedgerStore>,
    pub payment_provider: Arc<dyn PaymentProvider>,
    pub ingress: Arc<WebhookIngress>,
    pub checkout: CheckoutSettings,
}

impl BillingAppState {
    pub fn start_checkout_handler(&self) -> StartCheckoutHandler {
        StartCheckoutHandler::new(
            self.ledger.clone(),
            self.payment_provider.clone(),
            self.checkout.clone(),
        )
    }

    pub fn cancel_subscription_handler(&self) -> CancelSubscriptionHandler {
        CancelSubscriptionHandler::new(self.ledger.clone(), self.payment_provider.clone())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Command Handlers (POST endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/subscriptions/subscribe - Start a checkout
pub async fn start_checkout(
    State(state): State<BillingAppState>,
    RequireAuth(user): RequireAuth,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.start_checkout_handler();
    let result = handler
        .handle(StartCheckoutCommand {
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(CheckoutResponse::from(result)))
}

/// POST /api/subscriptions/cancel - Cancel at period end
pub async fn cancel_subscription(
    State(state): State<BillingAppState>,
    RequireAuth(user): RequireAuth,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.cancel_subscription_handler();
    let result = handler
        .handle(CancelSubscriptionCommand {
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(CancelResponse::from(result)))
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhooks
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/webhooks/stripe/:category - Receive a Stripe webhook
///
/// Always acknowledged with 200. Verification and processing run in a
/// spawned task and their outcome only reaches the logs.
pub async fn receive_stripe_webhook(
    State(state): State<BillingAppState>,
    Path(category): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(category) = category.parse::<EventCategory>() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let ingress = state.ingress.clone();
    tokio::spawn(async move {
        // Outcome is logged by the ingress.
        let _ = ingress.receive(category, &body, signature.as_deref()).await;
    });

    (StatusCode::OK, WEBHOOK_ACK).into_response()
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts billing errors to HTTP responses.
#[derive(Debug)]
pub struct BillingApiError(BillingError);

impl From<BillingError> for BillingApiError {
    fn from(err: BillingError) -> Self {
        Self(err)
    }
}

impl IntoResponse for BillingApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            BillingError::UserNotFound(_) => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            BillingError::NoActiveSubscription(_) => {
                (StatusCode::NOT_FOUND, "NO_ACTIVE_SUBSCRIPTION")
            }
            BillingError::AlreadyActive(_) => (StatusCode::CONFLICT, "SUBSCRIPTION_ACTIVE"),
            BillingError::Provider(_) => (StatusCode::BAD_GATEWAY, "PAYMENT_PROVIDER_ERROR"),
            BillingError::Infrastructure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let message = match &self.0 {
            BillingError::Infrastructure(detail) => {
                tracing::error!(error = %detail, "Billing request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}
