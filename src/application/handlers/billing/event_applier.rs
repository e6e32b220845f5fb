//! EventApplier - Applies one lifecycle event to the ledger, then the CRM.
//!
//! Deliveries arrive in any order, possibly more than once, and possibly
//! concurrently, so every branch is idempotent on its own:
//!
//! - Subscribed: a conflict-safe insert; a repeat only fills in linkage a
//!   failed first attempt left missing
//! - Updated: one conditional statement writes status and `is_active`
//! - PaymentSucceeded: the invoice chain runs under a claim, so concurrent
//!   deliveries of one Stripe invoice record it once
//!
//! Local writes are committed before any CRM call. A CRM failure after that
//! is logged and leaves the ledger as it is.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::billing::{
    ApplyOutcome, CheckoutCompleted, InvoicePaid, LifecycleChange, LifecycleEvent,
    LifecycleEventHandler, NewSubscription, Subscription, SubscriptionChanged, User,
    WebhookError,
};
use crate::ports::{LedgerStore, PaymentProvider, SaveResult};

use super::crm_sync::{CrmSynchronizer, InvoiceRecording};

pub struct EventApplier {
    ledger: Arc<dyn LedgerStore>,
    payments: Arc<dyn PaymentProvider>,
    crm: Arc<CrmSynchronizer>,
}

impl EventApplier {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        payments: Arc<dyn PaymentProvider>,
        crm: Arc<CrmSynchronizer>,
    ) -> Self {
        Self {
            ledger,
            payments,
            crm,
        }
    }

    pub async fn apply(&self, event: &LifecycleEvent) -> Result<ApplyOutcome, WebhookError> {
        match &event.change {
            LifecycleChange::Subscribed(checkout) => {
                self.apply_subscribed(&event.event_id, checkout).await
            }
            LifecycleChange::Updated(changed) => self.apply_updated(&event.event_id, changed).await,
            LifecycleChange::PaymentSucceeded(invoice) => {
                self.apply_payment(&event.event_id, invoice).await
            }
        }
    }

    async fn apply_subscribed(
        &self,
        event_id: &str,
        checkout: &CheckoutCompleted,
    ) -> Result<ApplyOutcome, WebhookError> {
        if let Some(existing) = self
            .ledger
            .find_subscription_by_external_id(&checkout.subscription_id)
            .await?
        {
            tracing::info!(
                event_id,
                subscription_id = %checkout.subscription_id,
                "Subscription already recorded; checking linkage"
            );
            self.complete_linkage(event_id, checkout, &existing).await?;
            return Ok(ApplyOutcome::DuplicateDelivery);
        }

        let Some(mut user) = self.ledger.find_user(&checkout.user_id).await? else {
            tracing::warn!(event_id, user_id = %checkout.user_id, "Checkout for unknown user");
            return Ok(ApplyOutcome::UserNotFound);
        };

        let remote = self
            .payments
            .get_subscription(&checkout.subscription_id)
            .await?
            .ok_or_else(|| {
                WebhookError::Provider(format!(
                    "Subscription {} not found at Stripe",
                    checkout.subscription_id
                ))
            })?;

        let status = remote.status;
        let subscription = Subscription::create(NewSubscription {
            user_id: user.id,
            external_subscription_id: remote.id,
            external_customer_id: checkout.customer_id.clone(),
            external_price_id: remote.price_id,
            plan_name: remote.plan_name,
            status,
            currency: remote.currency,
            current_period_start: remote.current_period_start,
            current_period_end: remote.current_period_end,
            cancellation: remote.cancellation,
            metadata: checkout.metadata.clone(),
        });

        if self.ledger.insert_subscription(&subscription).await? == SaveResult::AlreadyExists {
            tracing::info!(
                event_id,
                subscription_id = %checkout.subscription_id,
                "Subscription inserted concurrently"
            );
            return Ok(ApplyOutcome::DuplicateDelivery);
        }

        self.ledger
            .set_customer_id(&user.id, &checkout.customer_id)
            .await?;
        self.ledger.set_lifecycle_status(&user.id, status).await?;
        user.billing.external_customer_id = Some(checkout.customer_id.clone());
        user.billing.lifecycle_status = Some(status);

        tracing::info!(
            event_id,
            user_id = %user.id,
            subscription_id = %subscription.external_subscription_id,
            status = %status,
            "Subscription created"
        );

        if let Err(e) = self.crm.sync_subscription(&user, &subscription).await {
            tracing::warn!(event_id, user_id = %user.id, error = %e, "CRM sync failed after subscribe");
        }

        Ok(ApplyOutcome::SubscriptionCreated)
    }

    /// Writes the customer id, lifecycle status and CRM deal that an earlier
    /// delivery of this checkout created the subscription without.
    async fn complete_linkage(
        &self,
        event_id: &str,
        checkout: &CheckoutCompleted,
        subscription: &Subscription,
    ) -> Result<(), WebhookError> {
        if subscription.user_id != checkout.user_id {
            return Ok(());
        }
        let Some(mut user) = self.ledger.find_user(&subscription.user_id).await? else {
            return Ok(());
        };

        if user.billing.external_customer_id.is_none() {
            self.ledger
                .set_customer_id(&user.id, &subscription.external_customer_id)
                .await?;
            user.billing.external_customer_id = Some(subscription.external_customer_id.clone());
            tracing::info!(event_id, user_id = %user.id, "Customer id restored");
        }
        if user.billing.lifecycle_status.is_none() {
            let status = subscription.status();
            self.ledger.set_lifecycle_status(&user.id, status).await?;
            user.billing.lifecycle_status = Some(status);
            tracing::info!(event_id, user_id = %user.id, status = %status, "Lifecycle status restored");
        }
        if user.billing.crm_deal_id.is_none() {
            match self.crm.sync_subscription(&user, subscription).await {
                Ok(deal_id) => {
                    tracing::info!(event_id, user_id = %user.id, deal_id = %deal_id, "CRM linkage restored")
                }
                Err(e) => {
                    tracing::warn!(event_id, user_id = %user.id, error = %e, "CRM sync failed on repeat subscribe")
                }
            }
        }
        Ok(())
    }

    async fn apply_updated(
        &self,
        event_id: &str,
        changed: &SubscriptionChanged,
    ) -> Result<ApplyOutcome, WebhookError> {
        let status = changed.change.status;

        let Some(subscription) = self
            .ledger
            .apply_status_change(&changed.subscription_id, &changed.change)
            .await?
        else {
            tracing::warn!(
                event_id,
                subscription_id = %changed.subscription_id,
                kind = ?changed.kind,
                "Status change for unknown subscription"
            );
            return Ok(ApplyOutcome::SubscriptionNotFound);
        };

        if !self
            .ledger
            .set_lifecycle_status_by_customer(&changed.customer_id, status)
            .await?
        {
            tracing::warn!(event_id, customer_id = %changed.customer_id, "No user for customer");
        }

        tracing::info!(
            event_id,
            subscription_id = %changed.subscription_id,
            status = %status,
            kind = ?changed.kind,
            "Subscription status updated"
        );

        match self.ledger.find_user(&subscription.user_id).await? {
            Some(user) => {
                if let Err(e) = self.crm.upsert_deal(&user, &subscription).await {
                    tracing::warn!(event_id, user_id = %user.id, error = %e, "Deal stage propagation failed");
                }
            }
            None => {
                tracing::warn!(event_id, user_id = %subscription.user_id, "Subscription owner missing");
            }
        }

        Ok(ApplyOutcome::StatusUpdated)
    }

    async fn apply_payment(
        &self,
        event_id: &str,
        invoice: &InvoicePaid,
    ) -> Result<ApplyOutcome, WebhookError> {
        let Some(user) = self.resolve_payer(invoice).await? else {
            tracing::warn!(
                event_id,
                invoice_id = %invoice.invoice_id,
                "No user for paid invoice"
            );
            return Ok(ApplyOutcome::UserNotFound);
        };

        if user.billing.has_recorded_invoice(&invoice.invoice_id) {
            tracing::info!(event_id, invoice_id = %invoice.invoice_id, "Invoice already recorded");
            return Ok(ApplyOutcome::DuplicateDelivery);
        }

        match self.crm.record_paid_invoice(&user, invoice).await? {
            InvoiceRecording::Recorded { .. } => Ok(ApplyOutcome::InvoiceRecorded),
            InvoiceRecording::AlreadyClaimed => {
                tracing::info!(
                    event_id,
                    invoice_id = %invoice.invoice_id,
                    "Invoice recorded or being recorded by another delivery"
                );
                Ok(ApplyOutcome::DuplicateDelivery)
            }
            InvoiceRecording::LinkageMissing => {
                tracing::warn!(
                    event_id,
                    user_id = %user.id,
                    invoice_id = %invoice.invoice_id,
                    "User has no CRM contact or deal; invoice not recorded"
                );
                Ok(ApplyOutcome::LinkageMissing)
            }
        }
    }

    /// Billing email first, then the Stripe customer id.
    async fn resolve_payer(&self, invoice: &InvoicePaid) -> Result<Option<User>, WebhookError> {
        if let Some(email) = &invoice.customer_email {
            if let Some(user) = self.ledger.find_user_by_email(email).await? {
                return Ok(Some(user));
            }
        }
        match &invoice.customer_id {
            Some(customer_id) => Ok(self.ledger.find_user_by_customer_id(customer_id).await?),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LifecycleEventHandler for EventApplier {
    async fn handle(&self, event: &LifecycleEvent) -> Result<ApplyOutcome, WebhookError> {
        self.apply(event).await
    }
}
