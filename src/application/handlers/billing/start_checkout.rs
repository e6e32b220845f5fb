//! StartCheckoutHandler - Command handler that opens a Stripe checkout.

use std::sync::Arc;

use crate::domain::billing::BillingError;
use crate::domain::foundation::UserId;
use crate::ports::{CreateCheckoutRequest, CreateCustomerRequest, LedgerStore, PaymentProvider};

/// Command to start a subscription checkout.
#[derive(Debug, Clone)]
pub struct StartCheckoutCommand {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCheckoutResult {
    /// Stripe-hosted page the browser is sent to.
    pub url: String,
}

/// Where checkout sends the browser and what it sells.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Handler for starting checkouts.
///
/// The subscription itself is only recorded when the
/// `checkout.session.completed` webhook arrives.
pub struct StartCheckoutHandler {
    ledger: Arc<dyn LedgerStore>,
    payments: Arc<dyn PaymentProvider>,
    settings: CheckoutSettings,
}

impl StartCheckoutHandler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        payments: Arc<dyn PaymentProvider>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            ledger,
            payments,
            settings,
        }
    }

    pub async fn handle(&self, cmd: StartCheckoutCommand) -> Result<StartCheckoutResult, BillingError> {
        // 1. The user must exist and not already pay
        let user = self
            .ledger
            .find_user(&cmd.user_id)
            .await?
            .ok_or(BillingError::UserNotFound(cmd.user_id))?;

        if user.has_active_subscription() {
            return Err(BillingError::AlreadyActive(user.id));
        }

        // 2. Reuse the Stripe customer, or create one
        let customer_id = match &user.billing.external_customer_id {
            Some(id) => id.clone(),
            None => {
                let customer = self
                    .payments
                    .create_customer(CreateCustomerRequest {
                        user_id: user.id,
                        email: user.email.clone(),
                        name: Some(user.name.clone()).filter(|n| !n.is_empty()),
                    })
                    .await?;
                self.ledger.set_customer_id(&user.id, &customer.id).await?;
                tracing::info!(user_id = %user.id, customer_id = %customer.id, "Stripe customer created");
                customer.id
            }
        };

        // 3. Open the session
        let session = self
            .payments
            .create_checkout_session(CreateCheckoutRequest {
                user_id: user.id,
                customer_id,
                price_id: self.settings.price_id.clone(),
                success_url: self.settings.success_url.clone(),
                cancel_url: self.settings.cancel_url.clone(),
            })
            .await?;

        tracing::info!(user_id = %user.id, session_id = %session.id, "Checkout session created");

        Ok(StartCheckoutResult { url: session.url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryLedgerStore;
    use crate::adapters::stripe::MockPaymentProvider;
    use crate::domain::billing::{SubscriptionStatus, User};
    use crate::ports::PaymentError;

    fn settings() -> CheckoutSettings {
        CheckoutSettings {
            price_id: "price_pro".to_string(),
            success_url: "http://localhost:5173/stripe/success".to_string(),
            cancel_url: "http://localhost:5173/stripe/cancel".to_string(),
        }
    }

    fn handler(ledger: &Arc<InMemoryLedgerStore>, payments: &MockPaymentProvider) -> StartCheckoutHandler {
        StartCheckoutHandler::new(ledger.clone(), Arc::new(payments.clone()), settings())
    }

    #[tokio::test]
    async fn creates_customer_once_and_returns_session_url() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let payments = MockPaymentProvider::new();
        let user = User::new("ana@example.com", "Ana");
        ledger.insert_user(user.clone()).await;
        let handler = handler(&ledger, &payments);

        let first = handler.handle(StartCheckoutCommand { user_id: user.id }).await.unwrap();
        handler.handle(StartCheckoutCommand { user_id: user.id }).await.unwrap();

        assert!(first.url.starts_with("https://checkout.stripe.test/cs_mock_"));
        assert_eq!(payments.calls_to("create_customer").len(), 1);
        assert_eq!(payments.calls_to("create_checkout_session").len(), 2);
        let stored = ledger.user(&user.id).await.unwrap();
        assert_eq!(stored.billing.external_customer_id.as_deref(), Some("cus_mock_1"));
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let payments = MockPaymentProvider::new();
        let user_id = UserId::new();

        let err = handler(&ledger, &payments)
            .handle(StartCheckoutCommand { user_id })
            .await
            .unwrap_err();

        assert_eq!(err, BillingError::UserNotFound(user_id));
        assert!(payments.calls().is_empty());
    }

    #[tokio::test]
    async fn active_user_is_rejected() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let payments = MockPaymentProvider::new();
        let mut user = User::new("ana@example.com", "Ana");
        user.billing.lifecycle_status = Some(SubscriptionStatus::Active);
        ledger.insert_user(user.clone()).await;

        let err = handler(&ledger, &payments)
            .handle(StartCheckoutCommand { user_id: user.id })
            .await
            .unwrap_err();

        assert_eq!(err, BillingError::AlreadyActive(user.id));
    }

    #[tokio::test]
    async fn stripe_failure_surfaces_as_provider_error() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let payments = MockPaymentProvider::new();
        payments.fail_method("create_checkout_session", PaymentError::provider("boom"));
        let user = User::new("ana@example.com", "Ana");
        ledger.insert_user(user.clone()).await;

        let err = handler(&ledger, &payments)
            .handle(StartCheckoutCommand { user_id: user.id })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Provider(_)));
    }
}
