//! Billing handlers.
//!
//! ## Commands
//! - Starting a subscription checkout
//! - Cancelling a subscription at period end
//!
//! ## Lifecycle
//! - Webhook ingress (verification per category, idempotent processing)
//! - Event applier (ledger writes, then CRM propagation)
//! - CRM synchronizer (contact, deal, invoice chain)
//! - Reconciliation sweeper (daily time-based stage correction)

mod cancel_subscription;
mod crm_sync;
mod event_applier;
mod start_checkout;
mod sweeper;
mod webhook_ingress;

// Commands
pub use cancel_subscription::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
};
pub use start_checkout::{
    CheckoutSettings, StartCheckoutCommand, StartCheckoutHandler, StartCheckoutResult,
};

// Lifecycle
pub use crm_sync::{CrmSyncError, CrmSynchronizer, InvoiceRecording};
pub use event_applier::EventApplier;
pub use sweeper::{ReconciliationSweeper, SweepError, SweepReport};
pub use webhook_ingress::{WebhookIngress, WebhookSecrets};
