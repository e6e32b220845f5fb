//! Axum router configuration for billing endpoints.

use axum::{routing::post, Router};

use super::handlers::{
    cancel_subscription, receive_stripe_webhook, start_checkout, BillingAppState,
};

/// Subscription routes. Mount under `/api/subscriptions` behind the auth
/// middleware.
///
/// - `POST /subscribe` - Start a Stripe checkout
/// - `POST /cancel` - Cancel at period end
pub fn subscription_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/subscribe", post(start_checkout))
        .route("/cancel", post(cancel_subscription))
}

/// Stripe webhook routes. Mount under `/api/webhooks`; no user auth, each
/// delivery is verified against its category's signing secret.
///
/// - `POST /stripe/subscribed`
/// - `POST /stripe/payment-succeeded`
/// - `POST /stripe/updated`
pub fn webhook_routes() -> Router<BillingAppState> {
    Router::new().route("/stripe/:category", post(receive_stripe_webhook))
}
