//! CancelSubscriptionHandler - Command handler for cancelling at period end.

use std::sync::Arc;

use crate::domain::billing::{BillingError, Cancellation};
use crate::domain::foundation::UserId;
use crate::ports::{LedgerStore, PaymentProvider};

#[derive(Debug, Clone)]
pub struct CancelSubscriptionCommand {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CancelSubscriptionResult {
    pub subscription_id: String,
    pub cancellation: Cancellation,
}

/// Handler for cancelling subscriptions.
///
/// Only the cancellation fields are written locally. Status changes when
/// Stripe sends `customer.subscription.updated` / `deleted`.
pub struct CancelSubscriptionHandler {
    ledger: Arc<dyn LedgerStore>,
    payments: Arc<dyn PaymentProvider>,
}

impl CancelSubscriptionHandler {
    pub fn new(ledger: Arc<dyn LedgerStore>, payments: Arc<dyn PaymentProvider>) -> Self {
        Self { ledger, payments }
    }

    pub async fn handle(
        &self,
        cmd: CancelSubscriptionCommand,
    ) -> Result<CancelSubscriptionResult, BillingError> {
        let subscription = self
            .ledger
            .find_active_subscription_for_user(&cmd.user_id)
            .await?
            .ok_or(BillingError::NoActiveSubscription(cmd.user_id))?;

        let remote = self
            .payments
            .set_cancel_at_period_end(&subscription.external_subscription_id, true)
            .await?;

        if !self
            .ledger
            .update_cancellation(&subscription.external_subscription_id, &remote.cancellation)
            .await?
        {
            tracing::warn!(
                subscription_id = %subscription.external_subscription_id,
                "Subscription vanished before cancellation write-back"
            );
        }

        tracing::info!(
            user_id = %cmd.user_id,
            subscription_id = %subscription.external_subscription_id,
            "Subscription set to cancel at period end"
        );

        Ok(CancelSubscriptionResult {
            subscription_id: subscription.external_subscription_id,
            cancellation: remote.cancellation,
        })
    }
}
