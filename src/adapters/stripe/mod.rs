//! Stripe payment provider adapter.
//!
//! Implements the `PaymentProvider` port against the Stripe REST API:
//! - Customer creation
//! - Subscription-mode checkout sessions
//! - Subscription retrieve and cancel-at-period-end updates
//!
//! Webhook signature verification lives in `domain::billing`, since it only
//! depends on the endpoint secret.
//!
//! # Configuration
//!
//! - `COPYDESK__PAYMENT__STRIPE_API_KEY`: Stripe secret API key

mod mock_payment_provider;
mod stripe_adapter;

pub use mock_payment_provider::{MethodCall, MockPaymentProvider};
pub use stripe_adapter::{StripeConfig, StripePaymentAdapter};
