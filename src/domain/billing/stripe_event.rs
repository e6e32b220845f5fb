//! Stripe webhook payload types.
//!
//! Only fields the lifecycle pipeline reads are captured; everything else in
//! Stripe's schema is ignored by serde.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stripe webhook event envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeEvent {
    /// Unique identifier for the event (evt_xxx format).
    pub id: String,

    /// Type of event (e.g., "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Time at which the event was created (Unix timestamp).
    pub created: i64,

    pub data: StripeEventData,

    /// Whether this is a live mode event (vs test mode).
    #[serde(default)]
    pub livemode: bool,

    /// API version used to render this event.
    #[serde(default)]
    pub api_version: Option<String>,
}

/// Container for event-specific data.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeEventData {
    /// The object that triggered the event (polymorphic based on event type).
    pub object: serde_json::Value,

    /// Previous values for updated attributes (only for update events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_attributes: Option<serde_json::Value>,
}

impl StripeEvent {
    /// Attempts to deserialize the data object as the specified type.
    pub fn deserialize_object<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data.object)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Stripe Object Types
// ════════════════════════════════════════════════════════════════════════════════

/// Checkout Session object (`checkout.session.completed`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeCheckoutSession {
    /// Session identifier (cs_...).
    pub id: String,

    /// Customer created or attached during checkout.
    pub customer: Option<String>,

    /// Subscription created by a subscription-mode checkout.
    pub subscription: Option<String>,

    #[serde(default)]
    pub mode: Option<String>,

    /// Metadata set when the session was created; carries `user_id`.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Subscription object (`customer.subscription.*` and subscription retrieve).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeSubscription {
    /// Subscription identifier (sub_...).
    pub id: String,

    /// Customer owning this subscription.
    pub customer: String,

    pub status: String,

    #[serde(default)]
    pub currency: Option<String>,

    #[serde(default)]
    pub start_date: Option<i64>,

    #[serde(default)]
    pub current_period_start: Option<i64>,

    #[serde(default)]
    pub current_period_end: Option<i64>,

    #[serde(default)]
    pub cancel_at: Option<i64>,

    #[serde(default)]
    pub cancel_at_period_end: bool,

    #[serde(default)]
    pub canceled_at: Option<i64>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(default)]
    pub items: StripeList<StripeSubscriptionItem>,
}

impl StripeSubscription {
    /// Price of the first subscription item.
    pub fn primary_price(&self) -> Option<&StripePrice> {
        self.items.data.first().map(|item| &item.price)
    }
}

/// Stripe list container (`{"object": "list", "data": [...]}`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> Default for StripeList<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

/// Single subscription item.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    pub price: StripePrice,
}

/// Price object, embedded in subscription items and invoice lines.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripePrice {
    pub id: String,

    /// Display name for the plan.
    #[serde(default)]
    pub nickname: Option<String>,

    /// Unit amount in minor units.
    #[serde(default)]
    pub unit_amount: Option<i64>,

    #[serde(default)]
    pub currency: Option<String>,
}

/// Invoice object (`invoice.payment_succeeded`, `invoice.paid`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeInvoice {
    /// Invoice identifier (in_...).
    pub id: String,

    #[serde(default)]
    pub customer: Option<String>,

    /// Billing email captured on the invoice.
    #[serde(default)]
    pub customer_email: Option<String>,

    #[serde(default)]
    pub subscription: Option<String>,

    /// Amount paid in minor units.
    #[serde(default)]
    pub amount_paid: i64,

    pub currency: String,

    #[serde(default)]
    pub status_transitions: StripeStatusTransitions,

    #[serde(default)]
    pub lines: StripeList<StripeInvoiceLine>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StripeStatusTransitions {
    #[serde(default)]
    pub paid_at: Option<i64>,
}

/// Single invoice line.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeInvoiceLine {
    pub id: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Line amount in minor units.
    #[serde(default)]
    pub amount: i64,

    #[serde(default)]
    pub quantity: Option<i64>,

    #[serde(default)]
    pub price: Option<StripePrice>,
}

/// Builder for creating test StripeEvent instances.
#[cfg(test)]
pub struct StripeEventBuilder {
    id: String,
    event_type: String,
    created: i64,
    object: serde_json::Value,
    livemode: bool,
}

#[cfg(test)]
impl Default for StripeEventBuilder {
    fn default() -> Self {
        Self {
            id: "evt_test_123".to_string(),
            event_type: "checkout.session.completed".to_string(),
            created: chrono::Utc::now().timestamp(),
            object: serde_json::json!({}),
            livemode: false,
        }
    }
}

#[cfg(test)]
impl StripeEventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn object(mut self, object: serde_json::Value) -> Self {
        self.object = object;
        self
    }

    pub fn livemode(mut self, livemode: bool) -> Self {
        self.livemode = livemode;
        self
    }

    pub fn build(self) -> StripeEvent {
        StripeEvent {
            id: self.id,
            event_type: self.event_type,
            created: self.created,
            data: StripeEventData {
                object: self.object,
                previous_attributes: None,
            },
            livemode: self.livemode,
            api_version: Some("2023-10-16".to_string()),
        }
    }
}
