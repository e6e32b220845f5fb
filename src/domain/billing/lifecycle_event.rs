//! Normalized lifecycle events.
//!
//! Stripe delivers three webhook categories to three endpoints, each with its
//! own secret. [`EventCategory`] is the closed set of those endpoints and owns
//! the per-category table: which Stripe event types it accepts and how the
//! event object is decoded into a [`LifecycleEvent`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{Timestamp, UserId};

use super::stripe_event::{StripeCheckoutSession, StripeEvent, StripeInvoice, StripeSubscription};
use super::subscription::{Cancellation, StatusChange};
use super::{SubscriptionStatus, WebhookError};

/// Webhook endpoint category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventCategory {
    Subscribed,
    PaymentSucceeded,
    Updated,
}

impl EventCategory {
    pub const ALL: [EventCategory; 3] = [
        EventCategory::Subscribed,
        EventCategory::PaymentSucceeded,
        EventCategory::Updated,
    ];

    /// Path segment of the category's webhook route.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Subscribed => "subscribed",
            EventCategory::PaymentSucceeded => "payment-succeeded",
            EventCategory::Updated => "updated",
        }
    }

    /// Stripe event types delivered to this category's endpoint.
    pub fn accepted_event_types(&self) -> &'static [&'static str] {
        match self {
            EventCategory::Subscribed => &["checkout.session.completed"],
            EventCategory::PaymentSucceeded => &["invoice.payment_succeeded", "invoice.paid"],
            EventCategory::Updated => &[
                "customer.subscription.updated",
                "customer.subscription.deleted",
            ],
        }
    }

    pub fn accepts(&self, event_type: &str) -> bool {
        self.accepted_event_types().contains(&event_type)
    }

    /// Decodes a verified Stripe event into a lifecycle event.
    ///
    /// # Errors
    ///
    /// - `Ignored` - the event type does not belong to this category, or the
    ///   subscription status is one this service does not model
    /// - `ParseError` - the event object does not match the expected shape
    /// - `MissingField` / `MissingMetadata` - a required id is absent
    pub fn decode(&self, event: &StripeEvent) -> Result<LifecycleEvent, WebhookError> {
        if !self.accepts(&event.event_type) {
            return Err(WebhookError::Ignored(format!(
                "event type {} is not handled by the {} endpoint",
                event.event_type, self
            )));
        }

        let change = match self {
            EventCategory::Subscribed => LifecycleChange::Subscribed(decode_checkout(event)?),
            EventCategory::PaymentSucceeded => {
                LifecycleChange::PaymentSucceeded(decode_invoice(event)?)
            }
            EventCategory::Updated => LifecycleChange::Updated(decode_subscription(event)?),
        };

        Ok(LifecycleEvent {
            event_id: event.id.clone(),
            occurred_at: Timestamp::from_unix_secs(event.created).unwrap_or_default(),
            change,
            raw: event.data.object.clone(),
        })
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCategory {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| WebhookError::ParseError(format!("unknown webhook category: {}", s)))
    }
}

/// One webhook delivery, normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub event_id: String,
    pub occurred_at: Timestamp,
    pub change: LifecycleChange,
    /// The provider object exactly as delivered.
    pub raw: serde_json::Value,
}

impl LifecycleEvent {
    pub fn category(&self) -> EventCategory {
        match &self.change {
            LifecycleChange::Subscribed(_) => EventCategory::Subscribed,
            LifecycleChange::PaymentSucceeded(_) => EventCategory::PaymentSucceeded,
            LifecycleChange::Updated(_) => EventCategory::Updated,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleChange {
    Subscribed(CheckoutCompleted),
    PaymentSucceeded(InvoicePaid),
    Updated(SubscriptionChanged),
}

/// A subscription-mode checkout finished.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutCompleted {
    pub user_id: UserId,
    pub customer_id: String,
    pub subscription_id: String,
    pub metadata: serde_json::Value,
}

/// An invoice was paid.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoicePaid {
    pub invoice_id: String,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub subscription_id: Option<String>,
    /// Minor currency units.
    pub amount_paid: i64,
    pub currency: String,
    pub lines: Vec<InvoiceLine>,
    pub paid_at: Timestamp,
}

impl InvoicePaid {
    pub fn amount_paid_major(&self) -> f64 {
        to_major_units(self.amount_paid)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceLine {
    pub description: String,
    pub quantity: i64,
    /// Minor currency units.
    pub unit_amount: i64,
    /// Minor currency units.
    pub amount: i64,
    pub price_id: Option<String>,
}

/// Whether Stripe reported an update or the end of the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Updated,
    Deleted,
}

/// A subscription changed status or cancellation details.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionChanged {
    pub kind: UpdateKind,
    pub subscription_id: String,
    pub customer_id: String,
    pub change: StatusChange,
}

/// Converts a minor-unit amount to major units.
pub fn to_major_units(minor: i64) -> f64 {
    minor as f64 / 100.0
}

fn decode_checkout(event: &StripeEvent) -> Result<CheckoutCompleted, WebhookError> {
    let session: StripeCheckoutSession = event
        .deserialize_object()
        .map_err(|e| WebhookError::ParseError(e.to_string()))?;

    let customer_id = session.customer.ok_or(WebhookError::MissingField("customer"))?;
    let subscription_id = session
        .subscription
        .ok_or(WebhookError::MissingField("subscription"))?;
    let user_id = session
        .metadata
        .get("user_id")
        .or_else(|| session.metadata.get("userId"))
        .ok_or(WebhookError::MissingMetadata("user_id"))?
        .parse::<UserId>()
        .map_err(|_| WebhookError::ParseError("metadata user_id is not a UUID".to_string()))?;

    let metadata = serde_json::to_value(&session.metadata)
        .map_err(|e| WebhookError::ParseError(e.to_string()))?;

    Ok(CheckoutCompleted {
        user_id,
        customer_id,
        subscription_id,
        metadata,
    })
}

fn decode_invoice(event: &StripeEvent) -> Result<InvoicePaid, WebhookError> {
    let invoice: StripeInvoice = event
        .deserialize_object()
        .map_err(|e| WebhookError::ParseError(e.to_string()))?;

    if invoice.customer.is_none() && invoice.customer_email.is_none() {
        return Err(WebhookError::MissingField("customer_email"));
    }

    let lines = invoice
        .lines
        .data
        .into_iter()
        .map(|line| {
            let quantity = line.quantity.unwrap_or(1).max(1);
            let unit_amount = line
                .price
                .as_ref()
                .and_then(|p| p.unit_amount)
                .unwrap_or(line.amount / quantity);
            InvoiceLine {
                description: line
                    .description
                    .or_else(|| line.price.as_ref().and_then(|p| p.nickname.clone()))
                    .unwrap_or_else(|| "Subscription".to_string()),
                quantity,
                unit_amount,
                amount: line.amount,
                price_id: line.price.map(|p| p.id),
            }
        })
        .collect();

    let paid_at = Timestamp::from_optional_unix_secs(invoice.status_transitions.paid_at)
        .or_else(|| Timestamp::from_unix_secs(event.created))
        .unwrap_or_default();

    Ok(InvoicePaid {
        invoice_id: invoice.id,
        customer_id: invoice.customer,
        customer_email: invoice.customer_email,
        subscription_id: invoice.subscription,
        amount_paid: invoice.amount_paid,
        currency: invoice.currency,
        lines,
        paid_at,
    })
}

fn decode_subscription(event: &StripeEvent) -> Result<SubscriptionChanged, WebhookError> {
    let sub: StripeSubscription = event
        .deserialize_object()
        .map_err(|e| WebhookError::ParseError(e.to_string()))?;

    let status = sub
        .status
        .parse::<SubscriptionStatus>()
        .map_err(|e| WebhookError::Ignored(e.to_string()))?;

    let kind = if event.event_type == "customer.subscription.deleted" {
        UpdateKind::Deleted
    } else {
        UpdateKind::Updated
    };

    Ok(SubscriptionChanged {
        kind,
        subscription_id: sub.id,
        customer_id: sub.customer,
        change: StatusChange {
            status,
            cancellation: Cancellation {
                cancel_at: Timestamp::from_optional_unix_secs(sub.cancel_at),
                cancel_at_period_end: sub.cancel_at_period_end,
                canceled_at: Timestamp::from_optional_unix_secs(sub.canceled_at),
            },
            current_period_start: Timestamp::from_optional_unix_secs(sub.current_period_start),
            current_period_end: Timestamp::from_optional_unix_secs(sub.current_period_end),
        },
    })
}
