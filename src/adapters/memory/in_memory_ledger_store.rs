//! In-memory ledger store.
//!
//! Used by tests and local runs without Postgres. Each method takes the write
//! lock once, so every operation is atomic the same way a single SQL
//! statement is. Writes can be told to fail once, to exercise partial
//! failures.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use tokio::sync::RwLock;

use crate::domain::billing::{
    Cancellation, CrmContactId, CrmDealId, CrmInvoiceId, CrmLineItemId, InvoiceChainState,
    StatusChange, Subscription, SubscriptionStatus, User,
};
use crate::domain::foundation::{DomainError, ErrorCode, Timestamp, UserId};
use crate::ports::{InvoiceClaim, LedgerStore, LinkOutcome, SaveResult};

#[derive(Default)]
struct LedgerState {
    users: HashMap<UserId, User>,
    /// Keyed by external subscription id.
    subscriptions: HashMap<String, Subscription>,
}

/// Ledger store backed by a `HashMap`.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
    fail_once: Mutex<HashSet<&'static str>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user, standing in for the identity subsystem.
    pub async fn insert_user(&self, user: User) {
        self.state.write().await.users.insert(user.id, user);
    }

    pub async fn user(&self, user_id: &UserId) -> Option<User> {
        self.state.read().await.users.get(user_id).cloned()
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.state.read().await.subscriptions.values().cloned().collect()
    }

    /// Make the next call to the named write fail with a database error.
    pub fn fail_once(&self, method: &'static str) {
        self.fail_once
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method);
    }

    fn injected(&self, method: &'static str) -> Result<(), DomainError> {
        let armed = self
            .fail_once
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(method);
        if armed {
            return Err(DomainError::database(format!("injected {} failure", method)));
        }
        Ok(())
    }
}

fn user_not_found(user_id: &UserId) -> DomainError {
    DomainError::new(ErrorCode::UserNotFound, "User not found")
        .with_detail("user_id", user_id.to_string())
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn find_user(&self, user_id: &UserId) -> Result<Option<User>, DomainError> {
        Ok(self.state.read().await.users.get(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<User>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.billing.external_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn set_customer_id(
        &self,
        user_id: &UserId,
        customer_id: &str,
    ) -> Result<(), DomainError> {
        self.injected("set_customer_id")?;
        let mut state = self.state.write().await;
        let user = state.users.get_mut(user_id).ok_or_else(|| user_not_found(user_id))?;
        user.billing.external_customer_id = Some(customer_id.to_string());
        Ok(())
    }

    async fn set_lifecycle_status(
        &self,
        user_id: &UserId,
        status: SubscriptionStatus,
    ) -> Result<(), DomainError> {
        self.injected("set_lifecycle_status")?;
        let mut state = self.state.write().await;
        let user = state.users.get_mut(user_id).ok_or_else(|| user_not_found(user_id))?;
        user.billing.lifecycle_status = Some(status);
        Ok(())
    }

    async fn set_lifecycle_status_by_customer(
        &self,
        customer_id: &str,
        status: SubscriptionStatus,
    ) -> Result<bool, DomainError> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .values_mut()
            .find(|u| u.billing.external_customer_id.as_deref() == Some(customer_id));
        Ok(match user {
            Some(user) => {
                user.billing.lifecycle_status = Some(status);
                true
            }
            None => false,
        })
    }

    async fn set_crm_contact_id(
        &self,
        user_id: &UserId,
        contact_id: &CrmContactId,
    ) -> Result<(), DomainError> {
        self.injected("set_crm_contact_id")?;
        let mut state = self.state.write().await;
        let user = state.users.get_mut(user_id).ok_or_else(|| user_not_found(user_id))?;
        user.billing.crm_contact_id = Some(contact_id.clone());
        Ok(())
    }

    async fn link_crm_deal(
        &self,
        user_id: &UserId,
        deal_id: &CrmDealId,
    ) -> Result<LinkOutcome, DomainError> {
        self.injected("link_crm_deal")?;
        let mut state = self.state.write().await;
        let user = state.users.get_mut(user_id).ok_or_else(|| user_not_found(user_id))?;
        match &user.billing.crm_deal_id {
            Some(existing) if existing != deal_id => Ok(LinkOutcome::AlreadyLinked(existing.clone())),
            Some(_) => Ok(LinkOutcome::Linked),
            None => {
                user.billing.crm_deal_id = Some(deal_id.clone());
                Ok(LinkOutcome::Linked)
            }
        }
    }

    async fn claim_invoice(
        &self,
        user_id: &UserId,
        external_invoice_id: &str,
    ) -> Result<InvoiceClaim, DomainError> {
        self.injected("claim_invoice")?;
        let mut state = self.state.write().await;
        let user = state.users.get_mut(user_id).ok_or_else(|| user_not_found(user_id))?;
        Ok(match user.billing.claim_invoice(external_invoice_id, Timestamp::now()) {
            Some(resume) => InvoiceClaim::Claimed(resume),
            None => InvoiceClaim::Held,
        })
    }

    async fn set_crm_invoice_id(
        &self,
        user_id: &UserId,
        invoice_id: &CrmInvoiceId,
        external_invoice_id: &str,
    ) -> Result<(), DomainError> {
        self.injected("set_crm_invoice_id")?;
        let mut state = self.state.write().await;
        let user = state.users.get_mut(user_id).ok_or_else(|| user_not_found(user_id))?;
        if user.billing.invoiced_external_id.as_deref() == Some(external_invoice_id) {
            user.billing.crm_invoice_id = Some(invoice_id.clone());
        }
        Ok(())
    }

    async fn set_crm_line_item_id(
        &self,
        user_id: &UserId,
        line_item_id: &CrmLineItemId,
        external_invoice_id: &str,
    ) -> Result<(), DomainError> {
        self.injected("set_crm_line_item_id")?;
        let mut state = self.state.write().await;
        let user = state.users.get_mut(user_id).ok_or_else(|| user_not_found(user_id))?;
        if user.billing.invoiced_external_id.as_deref() == Some(external_invoice_id) {
            user.billing.crm_line_item_id = Some(line_item_id.clone());
        }
        Ok(())
    }

    async fn finish_invoice_claim(
        &self,
        user_id: &UserId,
        external_invoice_id: &str,
        finished: InvoiceChainState,
    ) -> Result<(), DomainError> {
        self.injected("finish_invoice_claim")?;
        let mut state = self.state.write().await;
        let user = state.users.get_mut(user_id).ok_or_else(|| user_not_found(user_id))?;
        if user.billing.invoiced_external_id.as_deref() == Some(external_invoice_id)
            && user.billing.invoice_state == Some(InvoiceChainState::Claimed)
        {
            user.billing.invoice_state = Some(finished);
        }
        Ok(())
    }

    async fn find_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .get(external_subscription_id)
            .cloned())
    }

    async fn insert_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<SaveResult, DomainError> {
        self.injected("insert_subscription")?;
        let mut state = self.state.write().await;
        if state
            .subscriptions
            .contains_key(&subscription.external_subscription_id)
        {
            return Ok(SaveResult::AlreadyExists);
        }
        state.subscriptions.insert(
            subscription.external_subscription_id.clone(),
            subscription.clone(),
        );
        Ok(SaveResult::Inserted)
    }

    async fn apply_status_change(
        &self,
        external_subscription_id: &str,
        change: &StatusChange,
    ) -> Result<Option<Subscription>, DomainError> {
        self.injected("apply_status_change")?;
        let mut state = self.state.write().await;
        Ok(state
            .subscriptions
            .get_mut(external_subscription_id)
            .map(|subscription| {
                change.apply_to(subscription);
                subscription.clone()
            }))
    }

    async fn find_active_subscription_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| &s.user_id == user_id && s.is_active())
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn update_cancellation(
        &self,
        external_subscription_id: &str,
        cancellation: &Cancellation,
    ) -> Result<bool, DomainError> {
        let mut state = self.state.write().await;
        Ok(match state.subscriptions.get_mut(external_subscription_id) {
            Some(subscription) => {
                subscription.cancellation = cancellation.clone();
                subscription.updated_at = Timestamp::now();
                true
            }
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::NewSubscription;

    fn subscription_for(user_id: UserId, external_id: &str) -> Subscription {
        let start = Timestamp::from_unix_secs(1_704_067_200).unwrap();
        Subscription::create(NewSubscription {
            user_id,
            external_subscription_id: external_id.to_string(),
            external_customer_id: "cus_1".to_string(),
            external_price_id: "price_1".to_string(),
            plan_name: Some("Pro".to_string()),
            status: SubscriptionStatus::Active,
            currency: "usd".to_string(),
            current_period_start: start,
            current_period_end: start.add_days(30),
            cancellation: Cancellation::default(),
            metadata: serde_json::json!({}),
        })
    }

    #[tokio::test]
    async fn insert_subscription_rejects_duplicate_external_id() {
        let store = InMemoryLedgerStore::new();
        let user_id = UserId::new();

        let first = store.insert_subscription(&subscription_for(user_id, "sub_1")).await.unwrap();
        let second = store.insert_subscription(&subscription_for(user_id, "sub_1")).await.unwrap();

        assert_eq!(first, SaveResult::Inserted);
        assert_eq!(second, SaveResult::AlreadyExists);
        assert_eq!(store.subscriptions().await.len(), 1);
    }

    #[tokio::test]
    async fn link_crm_deal_keeps_first_writer() {
        let store = InMemoryLedgerStore::new();
        let user = User::new("ana@example.com", "Ana");
        let user_id = user.id;
        store.insert_user(user).await;

        let first = store.link_crm_deal(&user_id, &CrmDealId::new("1")).await.unwrap();
        let again = store.link_crm_deal(&user_id, &CrmDealId::new("1")).await.unwrap();
        let other = store.link_crm_deal(&user_id, &CrmDealId::new("2")).await.unwrap();

        assert_eq!(first, LinkOutcome::Linked);
        assert_eq!(again, LinkOutcome::Linked);
        assert_eq!(other, LinkOutcome::AlreadyLinked(CrmDealId::new("1")));
    }

    #[tokio::test]
    async fn invoice_claim_is_exclusive_until_finished() {
        let store = InMemoryLedgerStore::new();
        let user = User::new("ana@example.com", "Ana");
        let user_id = user.id;
        store.insert_user(user).await;

        let first = store.claim_invoice(&user_id, "in_1").await.unwrap();
        let second = store.claim_invoice(&user_id, "in_1").await.unwrap();
        store
            .set_crm_invoice_id(&user_id, &CrmInvoiceId::new("501"), "in_1")
            .await
            .unwrap();
        store
            .finish_invoice_claim(&user_id, "in_1", InvoiceChainState::Interrupted)
            .await
            .unwrap();
        let resumed = store.claim_invoice(&user_id, "in_1").await.unwrap();

        assert!(matches!(first, InvoiceClaim::Claimed(_)));
        assert_eq!(second, InvoiceClaim::Held);
        match resumed {
            InvoiceClaim::Claimed(resume) => {
                assert_eq!(resume.invoice_id, Some(CrmInvoiceId::new("501")))
            }
            InvoiceClaim::Held => panic!("interrupted chain should be claimable"),
        }
    }

    #[tokio::test]
    async fn progress_for_a_superseded_invoice_is_ignored() {
        let store = InMemoryLedgerStore::new();
        let user = User::new("ana@example.com", "Ana");
        let user_id = user.id;
        store.insert_user(user).await;
        store.claim_invoice(&user_id, "in_1").await.unwrap();
        store.claim_invoice(&user_id, "in_2").await.unwrap();

        store
            .set_crm_invoice_id(&user_id, &CrmInvoiceId::new("501"), "in_1")
            .await
            .unwrap();
        store
            .finish_invoice_claim(&user_id, "in_1", InvoiceChainState::Recorded)
            .await
            .unwrap();

        let billing = store.user(&user_id).await.unwrap().billing;
        assert_eq!(billing.invoiced_external_id.as_deref(), Some("in_2"));
        assert!(billing.crm_invoice_id.is_none());
        assert_eq!(billing.invoice_state, Some(InvoiceChainState::Claimed));
    }

    #[tokio::test]
    async fn apply_status_change_on_unknown_id_returns_none() {
        let store = InMemoryLedgerStore::new();

        let result = store
            .apply_status_change("sub_missing", &StatusChange::status_only(SubscriptionStatus::Canceled))
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(store.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn email_lookup_ignores_case() {
        let store = InMemoryLedgerStore::new();
        store.insert_user(User::new("Ana@Example.com", "Ana")).await;

        let found = store.find_user_by_email("ana@example.com").await.unwrap();

        assert!(found.is_some());
    }
}
