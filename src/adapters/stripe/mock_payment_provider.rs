//! Mock payment provider for testing.
//!
//! Provides a configurable `PaymentProvider` for unit and integration tests:
//! - Seeded subscriptions
//! - Error injection, per method
//! - Call tracking

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::domain::billing::{Cancellation, SubscriptionStatus};
use crate::domain::foundation::Timestamp;
use crate::ports::{
    CheckoutSession, CreateCheckoutRequest, CreateCustomerRequest, Customer, PaymentError,
    PaymentProvider, ProviderSubscription,
};

/// Mock payment provider for testing.
///
/// # Example
///
/// ```ignore
/// let mock = MockPaymentProvider::new();
/// mock.add_subscription(MockPaymentProvider::active_subscription("sub_1", "cus_1"));
/// mock.fail_method("create_checkout_session", PaymentError::network("down"));
/// ```
#[derive(Default, Clone)]
pub struct MockPaymentProvider {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    subscriptions: HashMap<String, ProviderSubscription>,
    customer_counter: u32,
    session_counter: u32,
    method_errors: HashMap<&'static str, PaymentError>,
    call_log: Vec<MethodCall>,
}

/// Recorded method call for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    pub method: &'static str,
    pub args: Vec<String>,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Add a subscription to the "provider".
    pub fn add_subscription(&self, subscription: ProviderSubscription) {
        self.state()
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    /// Make every call to `method` fail with `error`.
    pub fn fail_method(&self, method: &'static str, error: PaymentError) {
        self.state().method_errors.insert(method, error);
    }

    pub fn clear_errors(&self) {
        self.state().method_errors.clear();
    }

    /// A month-long active subscription starting 2024-01-01.
    pub fn active_subscription(id: &str, customer_id: &str) -> ProviderSubscription {
        let start = Timestamp::from_unix_secs(1_704_067_200).unwrap_or_default();
        ProviderSubscription {
            id: id.to_string(),
            customer_id: customer_id.to_string(),
            status: SubscriptionStatus::Active,
            price_id: "price_test".to_string(),
            plan_name: Some("Pro".to_string()),
            currency: "usd".to_string(),
            current_period_start: start,
            current_period_end: start.add_days(31),
            cancellation: Cancellation::default(),
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Assertions
    // ════════════════════════════════════════════════════════════════════════════

    pub fn calls(&self) -> Vec<MethodCall> {
        self.state().call_log.clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<MethodCall> {
        self.state()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    fn record(&self, method: &'static str, args: Vec<String>) -> Result<(), PaymentError> {
        let mut state = self.state();
        state.call_log.push(MethodCall { method, args });
        match state.method_errors.get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<Customer, PaymentError> {
        self.record(
            "create_customer",
            vec![request.user_id.to_string(), request.email.clone()],
        )?;
        let mut state = self.state();
        state.customer_counter += 1;
        Ok(Customer {
            id: format!("cus_mock_{}", state.customer_counter),
            email: Some(request.email),
        })
    }

    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        self.record(
            "create_checkout_session",
            vec![
                request.user_id.to_string(),
                request.customer_id.clone(),
                request.price_id.clone(),
            ],
        )?;
        let mut state = self.state();
        state.session_counter += 1;
        let id = format!("cs_mock_{}", state.session_counter);
        Ok(CheckoutSession {
            url: format!("https://checkout.stripe.test/{}", id),
            id,
        })
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<ProviderSubscription>, PaymentError> {
        self.record("get_subscription", vec![subscription_id.to_string()])?;
        Ok(self.state().subscriptions.get(subscription_id).cloned())
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> Result<ProviderSubscription, PaymentError> {
        self.record(
            "set_cancel_at_period_end",
            vec![subscription_id.to_string(), cancel_at_period_end.to_string()],
        )?;
        let mut state = self.state();
        let subscription = state
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| PaymentError::not_found("Subscription"))?;
        subscription.cancellation.cancel_at_period_end = cancel_at_period_end;
        subscription.cancellation.cancel_at = if cancel_at_period_end {
            Some(subscription.current_period_end)
        } else {
            None
        };
        Ok(subscription.clone())
    }
}
