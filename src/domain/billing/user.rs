//! User account with its billing linkage.
//!
//! The identity subsystem owns the user; this module only cares about the
//! `billing` sub-record, which is written by the event applier, the CRM
//! synchronizer and the checkout command.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Timestamp, UserId};

use super::{CrmContactId, CrmDealId, CrmInvoiceId, CrmLineItemId, SubscriptionStatus};

/// Seconds after which an unfinished claim on an invoice chain is treated as
/// abandoned and may be taken over.
pub const INVOICE_CLAIM_TIMEOUT_SECS: i64 = 600;

/// Account role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Parses a stored role, treating anything unknown as a plain user.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

/// Where the CRM chain for the user's latest paid invoice stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceChainState {
    /// A delivery is building the chain.
    Claimed,
    /// Invoice, line item and payment all exist.
    Recorded,
    /// The last attempt stopped part-way; the next delivery resumes it.
    Interrupted,
}

impl InvoiceChainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceChainState::Claimed => "claimed",
            InvoiceChainState::Recorded => "recorded",
            InvoiceChainState::Interrupted => "interrupted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claimed" => Some(InvoiceChainState::Claimed),
            "recorded" => Some(InvoiceChainState::Recorded),
            "interrupted" => Some(InvoiceChainState::Interrupted),
            _ => None,
        }
    }
}

/// CRM objects already created for a claimed invoice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceResume {
    pub invoice_id: Option<CrmInvoiceId>,
    pub line_item_id: Option<CrmLineItemId>,
}

/// Links between a local user and the payment processor / CRM records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingLinkage {
    pub external_customer_id: Option<String>,
    pub lifecycle_status: Option<SubscriptionStatus>,
    pub crm_contact_id: Option<CrmContactId>,
    pub crm_deal_id: Option<CrmDealId>,
    pub crm_invoice_id: Option<CrmInvoiceId>,
    pub crm_line_item_id: Option<CrmLineItemId>,
    /// Stripe invoice behind `crm_invoice_id` and `crm_line_item_id`.
    pub invoiced_external_id: Option<String>,
    pub invoice_state: Option<InvoiceChainState>,
    pub invoice_claimed_at: Option<Timestamp>,
}

impl BillingLinkage {
    /// Both ids an invoice needs as association targets.
    pub fn invoice_targets(&self) -> Option<(&CrmContactId, &CrmDealId)> {
        match (&self.crm_contact_id, &self.crm_deal_id) {
            (Some(contact), Some(deal)) => Some((contact, deal)),
            _ => None,
        }
    }

    /// True when the chain for this Stripe invoice is complete.
    pub fn has_recorded_invoice(&self, external_invoice_id: &str) -> bool {
        self.invoiced_external_id.as_deref() == Some(external_invoice_id)
            && self.invoice_state == Some(InvoiceChainState::Recorded)
    }

    /// A different invoice, an interrupted chain, or a claim older than
    /// [`INVOICE_CLAIM_TIMEOUT_SECS`] can be claimed.
    pub fn can_claim_invoice(&self, external_invoice_id: &str, now: Timestamp) -> bool {
        if self.invoiced_external_id.as_deref() != Some(external_invoice_id) {
            return true;
        }
        match self.invoice_state {
            None | Some(InvoiceChainState::Interrupted) => true,
            Some(InvoiceChainState::Recorded) => false,
            Some(InvoiceChainState::Claimed) => self.invoice_claimed_at.map_or(true, |at| {
                *now.as_datetime() - *at.as_datetime()
                    >= Duration::seconds(INVOICE_CLAIM_TIMEOUT_SECS)
            }),
        }
    }

    /// Takes the chain for `external_invoice_id`, keeping the CRM ids of an
    /// earlier attempt at the same invoice. `None` when the claim is held.
    pub fn claim_invoice(
        &mut self,
        external_invoice_id: &str,
        now: Timestamp,
    ) -> Option<InvoiceResume> {
        if !self.can_claim_invoice(external_invoice_id, now) {
            return None;
        }
        if self.invoiced_external_id.as_deref() != Some(external_invoice_id) {
            self.invoiced_external_id = Some(external_invoice_id.to_string());
            self.crm_invoice_id = None;
            self.crm_line_item_id = None;
        }
        self.invoice_state = Some(InvoiceChainState::Claimed);
        self.invoice_claimed_at = Some(now);
        Some(InvoiceResume {
            invoice_id: self.crm_invoice_id.clone(),
            line_item_id: self.crm_line_item_id.clone(),
        })
    }
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub billing: BillingLinkage,
    pub created_at: Timestamp,
}

impl User {
    /// Creates a user with no billing linkage.
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            email: email.into(),
            name: name.into(),
            role: Role::User,
            password_hash: String::new(),
            billing: BillingLinkage::default(),
            created_at: Timestamp::now(),
        }
    }

    /// True when the lifecycle status mirrors an active subscription.
    pub fn has_active_subscription(&self) -> bool {
        self.billing
            .lifecycle_status
            .map(|s| s.is_active())
            .unwrap_or(false)
    }
}
