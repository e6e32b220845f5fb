//! HTTP adapters - REST API implementations.
//!
//! - `billing` - Subscription commands and Stripe webhook endpoints
//! - `middleware` - Bearer token authentication

pub mod billing;
pub mod middleware;

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, routing::get, Json, Router};

pub use billing::{BillingAppState, WEBHOOK_ACK};
pub use middleware::JwtVerifier;

/// Complete API router.
///
/// - `GET /health`
/// - `/api/subscriptions/*` (bearer token required)
/// - `/api/webhooks/stripe/:category`
pub fn api_router(state: BillingAppState, verifier: Arc<JwtVerifier>) -> Router {
    let subscriptions = billing::subscription_routes()
        .layer(from_fn_with_state(verifier, middleware::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .nest("/api/subscriptions", subscriptions)
        .nest("/api/webhooks", billing::webhook_routes())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
