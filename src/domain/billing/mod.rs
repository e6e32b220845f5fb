//! Billing domain module.
//!
//! Subscription lifecycle as mirrored from Stripe, the user's billing
//! linkage to Stripe and HubSpot, and the webhook plumbing that keeps the
//! three in step.
//!
//! # Module Structure
//!
//! - `status` - SubscriptionStatus as reported by Stripe
//! - `subscription` - Subscription aggregate
//! - `user` - User with its billing linkage
//! - `crm_ids` - Typed HubSpot object ids
//! - `deal_stage` - Deal pipeline stages and their derivation rules
//! - `stripe_event` - Stripe webhook payload types
//! - `lifecycle_event` - Category table and normalized lifecycle events
//! - `webhook_verifier` - Stripe-Signature verification
//! - `webhook_processor` - Event-id idempotency around the applier

mod crm_ids;
mod deal_stage;
mod errors;
mod lifecycle_event;
mod status;
pub mod stripe_event;
mod subscription;
mod user;
mod webhook_errors;
mod webhook_processor;
mod webhook_verifier;

pub use crm_ids::{CrmContactId, CrmDealId, CrmInvoiceId, CrmLineItemId, CrmPaymentId};
pub use deal_stage::{DealStage, UnknownDealStage};
pub use errors::BillingError;
pub use lifecycle_event::{
    to_major_units, CheckoutCompleted, EventCategory, InvoiceLine, InvoicePaid, LifecycleChange,
    LifecycleEvent, SubscriptionChanged, UpdateKind,
};
pub use status::{SubscriptionStatus, UnknownStatus};
pub use stripe_event::StripeEvent;
pub use subscription::{Cancellation, NewSubscription, StatusChange, Subscription, DEFAULT_PLAN_NAME};
pub use user::{
    BillingLinkage, InvoiceChainState, InvoiceResume, Role, User, INVOICE_CLAIM_TIMEOUT_SECS,
};
pub use webhook_errors::WebhookError;
pub use webhook_processor::{
    ApplyOutcome, IdempotentWebhookProcessor, LifecycleEventHandler, WebhookResult,
};
pub use webhook_verifier::{signature_header, SignatureHeader, StripeWebhookVerifier};
