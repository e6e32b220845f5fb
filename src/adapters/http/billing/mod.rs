//! HTTP adapter for subscriptions and Stripe webhooks.

mod dto;
mod handlers;
mod routes;

pub use dto::{CancelResponse, CheckoutResponse, ErrorResponse};
pub use handlers::{BillingApiError, BillingAppState, WEBHOOK_ACK};
pub use routes::{subscription_routes, webhook_routes};
