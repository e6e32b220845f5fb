//! Copydesk - Billing backend
//!
//! Receives Stripe subscription and payment webhooks, keeps the local ledger
//! of users and subscriptions consistent under out-of-order and duplicate
//! delivery, mirrors the lifecycle into HubSpot, and runs a daily sweep that
//! corrects time-based deal stages.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
