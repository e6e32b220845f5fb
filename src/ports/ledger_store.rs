//! Ledger store port - Durable record of users, subscriptions and CRM linkage.
//!
//! Every write is a single statement. Status writes are conditional updates
//! keyed by the external subscription id and always set `status` and
//! `is_active` together, so two concurrent deliveries for one subscription
//! serialize in the database and neither can overwrite the other with a stale
//! read. Nothing here holds a lock across a call to Stripe or HubSpot.

use async_trait::async_trait;

use crate::domain::billing::{
    Cancellation, CrmContactId, CrmDealId, CrmInvoiceId, CrmLineItemId, InvoiceChainState,
    InvoiceResume, StatusChange, Subscription, SubscriptionStatus, User,
};
use crate::domain::foundation::{DomainError, UserId};

use super::SaveResult;

/// Result of the compare-and-set that links a deal to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The given deal id is now (or already was) the user's deal.
    Linked,
    /// Another writer linked a different deal first; that id is kept.
    AlreadyLinked(CrmDealId),
}

/// Result of the compare-and-set that claims the CRM chain for an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceClaim {
    /// The caller owns the chain and continues from what already exists.
    Claimed(InvoiceResume),
    /// The chain is recorded, or another delivery holds a live claim.
    Held,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ─── Users ──────────────────────────────────────────────────────

    async fn find_user(&self, user_id: &UserId) -> Result<Option<User>, DomainError>;

    /// Case-insensitive email lookup.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DomainError>;

    async fn find_user_by_customer_id(&self, customer_id: &str)
        -> Result<Option<User>, DomainError>;

    async fn set_customer_id(&self, user_id: &UserId, customer_id: &str)
        -> Result<(), DomainError>;

    async fn set_lifecycle_status(
        &self,
        user_id: &UserId,
        status: SubscriptionStatus,
    ) -> Result<(), DomainError>;

    /// Sets the lifecycle status of the user owning `customer_id`.
    ///
    /// Returns `false` when no user has that customer id.
    async fn set_lifecycle_status_by_customer(
        &self,
        customer_id: &str,
        status: SubscriptionStatus,
    ) -> Result<bool, DomainError>;

    async fn set_crm_contact_id(
        &self,
        user_id: &UserId,
        contact_id: &CrmContactId,
    ) -> Result<(), DomainError>;

    /// Stores `deal_id` only if the user has no deal yet.
    async fn link_crm_deal(
        &self,
        user_id: &UserId,
        deal_id: &CrmDealId,
    ) -> Result<LinkOutcome, DomainError>;

    /// Claims the invoice chain for `external_invoice_id`, following
    /// [`BillingLinkage::can_claim_invoice`](crate::domain::billing::BillingLinkage::can_claim_invoice).
    async fn claim_invoice(
        &self,
        user_id: &UserId,
        external_invoice_id: &str,
    ) -> Result<InvoiceClaim, DomainError>;

    /// Records the CRM invoice created under the claim.
    ///
    /// This and the two methods below are no-ops once the user's claim has
    /// moved on to a different Stripe invoice.
    async fn set_crm_invoice_id(
        &self,
        user_id: &UserId,
        invoice_id: &CrmInvoiceId,
        external_invoice_id: &str,
    ) -> Result<(), DomainError>;

    async fn set_crm_line_item_id(
        &self,
        user_id: &UserId,
        line_item_id: &CrmLineItemId,
        external_invoice_id: &str,
    ) -> Result<(), DomainError>;

    /// Ends a claim as `Recorded` or `Interrupted`.
    async fn finish_invoice_claim(
        &self,
        user_id: &UserId,
        external_invoice_id: &str,
        state: InvoiceChainState,
    ) -> Result<(), DomainError>;

    // ─── Subscriptions ──────────────────────────────────────────────

    async fn find_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Inserts unless a record with the same external id exists.
    async fn insert_subscription(&self, subscription: &Subscription)
        -> Result<SaveResult, DomainError>;

    /// Atomically applies a status change by external id.
    ///
    /// Returns the updated record, or `None` when no record has that id.
    async fn apply_status_change(
        &self,
        external_subscription_id: &str,
        change: &StatusChange,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Most recently created subscription with `is_active` for the user.
    async fn find_active_subscription_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Writes only the cancellation fields. Returns `false` when not found.
    async fn update_cancellation(
        &self,
        external_subscription_id: &str,
        cancellation: &Cancellation,
    ) -> Result<bool, DomainError>;
}
