//! CRM client port.
//!
//! The CRM synchronizer and the reconciliation sweep talk to HubSpot only
//! through this trait. Implementations are constructed with their credential;
//! nothing is read from ambient process state at call time.
//!
//! Every create call that produces an id the next step depends on returns a
//! typed id, so the contact → deal → invoice → line item → payment chain
//! cannot be wired with the wrong kind of id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::billing::{
    CrmContactId, CrmDealId, CrmInvoiceId, CrmLineItemId, CrmPaymentId, DealStage,
};
use crate::domain::foundation::Timestamp;

/// Port for CRM object writes and deal listing.
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Create or update the contact keyed by email.
    async fn upsert_contact(&self, contact: &ContactProperties) -> Result<CrmContactId, CrmError>;

    /// Create a deal associated to a contact.
    async fn create_deal(
        &self,
        deal: &DealProperties,
        contact: &CrmContactId,
    ) -> Result<CrmDealId, CrmError>;

    /// Overwrite the properties of an existing deal.
    async fn update_deal(&self, deal_id: &CrmDealId, deal: &DealProperties) -> Result<(), CrmError>;

    /// Patch only the stage of an existing deal.
    async fn update_deal_stage(&self, deal_id: &CrmDealId, stage: DealStage)
        -> Result<(), CrmError>;

    /// One page of deals with the properties the sweep reads.
    async fn list_deals(&self, after: Option<&str>) -> Result<DealPage, CrmError>;

    /// Create an invoice associated to a contact and a deal.
    async fn create_invoice(
        &self,
        invoice: &InvoiceProperties,
        contact: &CrmContactId,
        deal: &CrmDealId,
    ) -> Result<CrmInvoiceId, CrmError>;

    /// Create a line item associated to an invoice.
    async fn create_line_item(
        &self,
        line_item: &LineItemProperties,
        invoice: &CrmInvoiceId,
    ) -> Result<CrmLineItemId, CrmError>;

    /// Create a payment associated to a line item.
    async fn create_payment(
        &self,
        payment: &PaymentProperties,
        line_item: &CrmLineItemId,
    ) -> Result<CrmPaymentId, CrmError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactProperties {
    pub email: String,
    pub firstname: String,
    pub lastname: String,
}

impl ContactProperties {
    /// Splits a display name into first and last name at the first space.
    pub fn from_display_name(email: impl Into<String>, name: &str) -> Self {
        let (first, last) = name.trim().split_once(' ').unwrap_or((name.trim(), ""));
        Self {
            email: email.into(),
            firstname: first.to_string(),
            lastname: last.trim().to_string(),
        }
    }
}

/// Properties written to a deal on create and update.
///
/// `first_subscription_date` is not among them: it is entered on the deal in
/// the CRM and only read back by the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealProperties {
    pub dealname: String,
    pub dealstage: DealStage,
    pub pipeline: String,
    /// Stripe's subscription id (sub_...), never the local id.
    pub stripe_subscription_id: String,
}

/// A deal as listed for the sweep. Properties are kept raw so one malformed
/// deal does not fail the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealSnapshot {
    pub id: CrmDealId,
    pub stage: Option<String>,
    pub first_subscription_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DealPage {
    pub deals: Vec<DealSnapshot>,
    /// Cursor for the next page; `None` on the last page.
    pub next_after: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceProperties {
    pub stripe_invoice_id: String,
    pub currency: String,
    /// Major currency units.
    pub amount: f64,
    pub invoice_date: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemProperties {
    pub name: String,
    pub quantity: i64,
    /// Unit price in major currency units.
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentProperties {
    /// Major currency units.
    pub amount: f64,
    pub currency: String,
    pub payment_date: Timestamp,
    pub stripe_invoice_id: String,
}

/// Errors from CRM calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmError {
    pub code: CrmErrorCode,
    pub message: String,
    /// HTTP status returned by the CRM, when there was a response.
    pub status: Option<u16>,
}

impl CrmError {
    pub fn new(code: CrmErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(CrmErrorCode::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(CrmErrorCode::Timeout, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(CrmErrorCode::Decode, message)
    }

    /// Classifies an HTTP error response.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let code = match status {
            401 | 403 => CrmErrorCode::Unauthorized,
            404 => CrmErrorCode::NotFound,
            409 => CrmErrorCode::Conflict,
            429 => CrmErrorCode::RateLimited,
            500..=599 => CrmErrorCode::Server,
            _ => CrmErrorCode::Rejected,
        };
        Self::new(code, body).with_status(status)
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl std::fmt::Display for CrmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.code, status, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for CrmError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrmErrorCode {
    Network,
    Timeout,
    Unauthorized,
    NotFound,
    Conflict,
    RateLimited,
    /// Request rejected as invalid (other 4xx).
    Rejected,
    Server,
    /// Response body did not have the expected shape.
    Decode,
}

impl CrmErrorCode {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrmErrorCode::Network
                | CrmErrorCode::Timeout
                | CrmErrorCode::RateLimited
                | CrmErrorCode::Server
        )
    }
}

impl std::fmt::Display for CrmErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CrmErrorCode::Network => "network_error",
            CrmErrorCode::Timeout => "timeout",
            CrmErrorCode::Unauthorized => "unauthorized",
            CrmErrorCode::NotFound => "not_found",
            CrmErrorCode::Conflict => "conflict",
            CrmErrorCode::RateLimited => "rate_limited",
            CrmErrorCode::Rejected => "rejected",
            CrmErrorCode::Server => "server_error",
            CrmErrorCode::Decode => "decode_error",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crm_client_is_object_safe() {
        fn _accepts_dyn(_client: &dyn CrmClient) {}
    }

    #[test]
    fn statuses_classify() {
        assert_eq!(CrmError::from_status(401, "").code, CrmErrorCode::Unauthorized);
        assert_eq!(CrmError::from_status(429, "").code, CrmErrorCode::RateLimited);
        assert_eq!(CrmError::from_status(502, "").code, CrmErrorCode::Server);
        assert_eq!(CrmError::from_status(400, "").code, CrmErrorCode::Rejected);
    }

    #[test]
    fn transient_failures_are_retryable() {
        assert!(CrmError::timeout("15s elapsed").is_retryable());
        assert!(CrmError::from_status(503, "").is_retryable());
        assert!(!CrmError::from_status(400, "bad property").is_retryable());
    }

    #[test]
    fn display_includes_status_when_present() {
        let err = CrmError::from_status(404, "deal 12 does not exist");
        assert_eq!(err.to_string(), "not_found (404): deal 12 does not exist");
    }

    #[test]
    fn display_name_splits_at_first_space() {
        let contact = ContactProperties::from_display_name("ana@example.com", "Ana María López");
        assert_eq!(contact.firstname, "Ana");
        assert_eq!(contact.lastname, "María López");

        let single = ContactProperties::from_display_name("x@example.com", "Prince");
        assert_eq!(single.firstname, "Prince");
        assert_eq!(single.lastname, "");
    }
}
