//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `http` - Axum routes for subscriptions and Stripe webhooks
//! - `hubspot` - HubSpot CRM client and an in-memory CRM for tests
//! - `memory` - In-memory ledger and webhook event stores
//! - `postgres` - PostgreSQL ledger and webhook event stores
//! - `stripe` - Stripe API client and a mock provider for tests

pub mod http;
pub mod hubspot;
pub mod memory;
pub mod postgres;
pub mod stripe;
