//! Subscription aggregate.
//!
//! One user's relationship to a paid plan, mirrored from Stripe.
//!
//! # Invariants
//!
//! - `external_subscription_id` is unique across all records
//! - `is_active == (status == Active)`; the only way to change `status` is
//!   [`Subscription::set_status`], which writes both
//! - Records are never deleted; ended subscriptions keep a terminal status

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{SubscriptionId, Timestamp, UserId};

use super::SubscriptionStatus;

/// Plan name used when the Stripe price has no nickname.
pub const DEFAULT_PLAN_NAME: &str = "Default Plan";

/// A user's paid subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub external_subscription_id: String,
    pub external_customer_id: String,
    pub external_price_id: String,
    pub plan_name: String,
    status: SubscriptionStatus,
    is_active: bool,
    pub currency: String,
    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,
    pub cancellation: Cancellation,
    pub metadata: serde_json::Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Cancellation fields as reported by Stripe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub cancel_at: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<Timestamp>,
}

/// Everything needed to create a subscription record from a completed checkout.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: UserId,
    pub external_subscription_id: String,
    pub external_customer_id: String,
    pub external_price_id: String,
    pub plan_name: Option<String>,
    pub status: SubscriptionStatus,
    pub currency: String,
    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,
    pub cancellation: Cancellation,
    pub metadata: serde_json::Value,
}

impl Subscription {
    /// Creates a new record from a completed checkout.
    pub fn create(new: NewSubscription) -> Self {
        let now = Timestamp::now();
        Self {
            id: SubscriptionId::new(),
            user_id: new.user_id,
            external_subscription_id: new.external_subscription_id,
            external_customer_id: new.external_customer_id,
            external_price_id: new.external_price_id,
            plan_name: new
                .plan_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_PLAN_NAME.to_string()),
            status: new.status,
            is_active: new.status.is_active(),
            currency: new.currency,
            current_period_start: new.current_period_start,
            current_period_end: new.current_period_end,
            cancellation: new.cancellation,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds a record from storage.
    ///
    /// `is_active` is re-derived from `status` rather than trusted from the row.
    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        id: SubscriptionId,
        user_id: UserId,
        external_subscription_id: String,
        external_customer_id: String,
        external_price_id: String,
        plan_name: String,
        status: SubscriptionStatus,
        currency: String,
        current_period_start: Timestamp,
        current_period_end: Timestamp,
        cancellation: Cancellation,
        metadata: serde_json::Value,
        created_at: Timestamp,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            id,
            user_id,
            external_subscription_id,
            external_customer_id,
            external_price_id,
            plan_name,
            status,
            is_active: status.is_active(),
            currency,
            current_period_start,
            current_period_end,
            cancellation,
            metadata,
            created_at,
            updated_at,
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Writes a new status together with the derived `is_active` flag.
    pub fn set_status(&mut self, status: SubscriptionStatus) {
        self.status = status;
        self.is_active = status.is_active();
        self.updated_at = Timestamp::now();
    }
}

/// Partial update carried by a `customer.subscription.updated|deleted` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: SubscriptionStatus,
    pub cancellation: Cancellation,
    pub current_period_start: Option<Timestamp>,
    pub current_period_end: Option<Timestamp>,
}

impl StatusChange {
    /// A change that only touches the status.
    pub fn status_only(status: SubscriptionStatus) -> Self {
        Self {
            status,
            cancellation: Cancellation::default(),
            current_period_start: None,
            current_period_end: None,
        }
    }

    /// Applies this change to an in-memory record.
    pub fn apply_to(&self, subscription: &mut Subscription) {
        subscription.set_status(self.status);
        subscription.cancellation = self.cancellation.clone();
        if let Some(start) = self.current_period_start {
            subscription.current_period_start = start;
        }
        if let Some(end) = self.current_period_end {
            subscription.current_period_end = end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_subscription(status: SubscriptionStatus) -> NewSubscription {
        let start = Timestamp::from_unix_secs(1_704_067_200).unwrap();
        NewSubscription {
            user_id: UserId::new(),
            external_subscription_id: "sub_123".to_string(),
            external_customer_id: "cus_123".to_string(),
            external_price_id: "price_123".to_string(),
            plan_name: None,
            status,
            currency: "usd".to_string(),
            current_period_start: start,
            current_period_end: start.add_days(30),
            cancellation: Cancellation::default(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn create_derives_is_active_from_status() {
        assert!(Subscription::create(new_subscription(SubscriptionStatus::Active)).is_active());
        assert!(!Subscription::create(new_subscription(SubscriptionStatus::Incomplete)).is_active());
    }

    #[test]
    fn create_falls_back_to_default_plan_name() {
        let sub = Subscription::create(new_subscription(SubscriptionStatus::Active));
        assert_eq!(sub.plan_name, DEFAULT_PLAN_NAME);

        let mut named = new_subscription(SubscriptionStatus::Active);
        named.plan_name = Some(String::new());
        assert_eq!(Subscription::create(named).plan_name, DEFAULT_PLAN_NAME);
    }

    #[test]
    fn set_status_keeps_is_active_in_step() {
        let mut sub = Subscription::create(new_subscription(SubscriptionStatus::Active));

        sub.set_status(SubscriptionStatus::PastDue);
        assert!(!sub.is_active());

        sub.set_status(SubscriptionStatus::Active);
        assert!(sub.is_active());
    }

    #[test]
    fn status_change_updates_cancellation_and_period() {
        let mut sub = Subscription::create(new_subscription(SubscriptionStatus::Active));
        let cancel_at = Timestamp::from_unix_secs(1_706_745_600).unwrap();
        let change = StatusChange {
            status: SubscriptionStatus::Canceled,
            cancellation: Cancellation {
                cancel_at: Some(cancel_at),
                cancel_at_period_end: true,
                canceled_at: Some(cancel_at),
            },
            current_period_start: None,
            current_period_end: Some(cancel_at),
        };

        change.apply_to(&mut sub);

        assert_eq!(sub.status(), SubscriptionStatus::Canceled);
        assert!(!sub.is_active());
        assert!(sub.cancellation.cancel_at_period_end);
        assert_eq!(sub.current_period_end, cancel_at);
    }
}
