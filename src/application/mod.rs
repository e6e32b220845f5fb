//! Application layer - Commands, lifecycle processing, and background jobs.
//!
//! This layer orchestrates domain operations and coordinates between ports.

pub mod handlers;

pub use handlers::billing::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CheckoutSettings, CrmSynchronizer,
    EventApplier, ReconciliationSweeper, StartCheckoutCommand, StartCheckoutHandler,
    SweepReport, WebhookIngress, WebhookSecrets,
};
