//! In-memory CRM for tests and local runs.
//!
//! Keeps contacts, deals, invoices, line items and payments in maps, logs
//! every call, and can be told to fail a method or a patch to a specific
//! deal.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::billing::{
    CrmContactId, CrmDealId, CrmInvoiceId, CrmLineItemId, CrmPaymentId, DealStage,
};
use crate::ports::{
    ContactProperties, CrmClient, CrmError, DealPage, DealProperties, DealSnapshot,
    InvoiceProperties, LineItemProperties, PaymentProperties,
};

/// A deal as the fake CRM stores it. Stage and date stay raw strings so
/// malformed remote data can be seeded.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeDeal {
    pub stage: Option<String>,
    pub first_subscription_date: Option<String>,
    pub properties: Option<DealProperties>,
    pub contact: Option<CrmContactId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeInvoice {
    pub properties: InvoiceProperties,
    pub contact: CrmContactId,
    pub deal: CrmDealId,
}

/// Recorded CRM call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmCall {
    pub method: &'static str,
    pub target: Option<String>,
}

#[derive(Default)]
struct CrmState {
    next_id: u64,
    contacts: HashMap<String, (CrmContactId, ContactProperties)>,
    deals: BTreeMap<u64, FakeDeal>,
    invoices: HashMap<CrmInvoiceId, FakeInvoice>,
    line_items: HashMap<CrmLineItemId, (LineItemProperties, CrmInvoiceId)>,
    payments: HashMap<CrmPaymentId, (PaymentProperties, CrmLineItemId)>,
    calls: Vec<CrmCall>,
    method_errors: HashMap<&'static str, CrmError>,
    failing_deals: HashSet<String>,
    page_size: Option<usize>,
    failing_page: Option<usize>,
}

impl CrmState {
    fn issue_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default, Clone)]
pub struct InMemoryCrm {
    inner: Arc<Mutex<CrmState>>,
}

fn parse_deal_key(deal_id: &CrmDealId) -> Result<u64, CrmError> {
    deal_id
        .as_str()
        .parse()
        .map_err(|_| CrmError::from_status(404, format!("deal {} does not exist", deal_id)))
}

impl InMemoryCrm {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CrmState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Seeding and failure injection
    // ════════════════════════════════════════════════════════════════════════════

    /// Seeds a deal with raw stage and start-date values; returns its id.
    pub fn seed_deal(&self, stage: Option<&str>, first_subscription_date: Option<&str>) -> CrmDealId {
        let mut state = self.state();
        let key = state.issue_id();
        state.deals.insert(
            key,
            FakeDeal {
                stage: stage.map(str::to_string),
                first_subscription_date: first_subscription_date.map(str::to_string),
                properties: None,
                contact: None,
            },
        );
        CrmDealId::new(key.to_string())
    }

    pub fn fail_method(&self, method: &'static str, error: CrmError) {
        self.state().method_errors.insert(method, error);
    }

    /// Make any patch to this deal fail with a 500.
    pub fn fail_deal(&self, deal_id: &CrmDealId) {
        self.state().failing_deals.insert(deal_id.to_string());
    }

    pub fn set_page_size(&self, size: usize) {
        self.state().page_size = Some(size.max(1));
    }

    /// Make the listing call for the given zero-based page fail.
    pub fn fail_page(&self, page: usize) {
        self.state().failing_page = Some(page);
    }

    pub fn clear_errors(&self) {
        let mut state = self.state();
        state.method_errors.clear();
        state.failing_deals.clear();
        state.failing_page = None;
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Inspection
    // ════════════════════════════════════════════════════════════════════════════

    pub fn deal(&self, deal_id: &CrmDealId) -> Option<FakeDeal> {
        let key = parse_deal_key(deal_id).ok()?;
        self.state().deals.get(&key).cloned()
    }

    pub fn deal_count(&self) -> usize {
        self.state().deals.len()
    }

    pub fn contact_count(&self) -> usize {
        self.state().contacts.len()
    }

    pub fn invoices(&self) -> Vec<FakeInvoice> {
        self.state().invoices.values().cloned().collect()
    }

    pub fn line_items(&self) -> Vec<(LineItemProperties, CrmInvoiceId)> {
        self.state().line_items.values().cloned().collect()
    }

    pub fn payments(&self) -> Vec<(PaymentProperties, CrmLineItemId)> {
        self.state().payments.values().cloned().collect()
    }

    pub fn calls(&self) -> Vec<CrmCall> {
        self.state().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.state().calls.iter().filter(|c| c.method == method).count()
    }

    fn record(&self, method: &'static str, target: Option<String>) -> Result<(), CrmError> {
        let mut state = self.state();
        let failing_deal = target
            .as_ref()
            .is_some_and(|t| state.failing_deals.contains(t));
        state.calls.push(CrmCall { method, target: target.clone() });
        if let Some(err) = state.method_errors.get(method) {
            return Err(err.clone());
        }
        if failing_deal {
            return Err(CrmError::from_status(500, "injected deal failure"));
        }
        Ok(())
    }

    fn patch(&self, deal_id: &CrmDealId, apply: impl FnOnce(&mut FakeDeal)) -> Result<(), CrmError> {
        let key = parse_deal_key(deal_id)?;
        let mut state = self.state();
        let deal = state
            .deals
            .get_mut(&key)
            .ok_or_else(|| CrmError::from_status(404, format!("deal {} does not exist", deal_id)))?;
        apply(deal);
        Ok(())
    }
}

#[async_trait]
impl CrmClient for InMemoryCrm {
    async fn upsert_contact(&self, contact: &ContactProperties) -> Result<CrmContactId, CrmError> {
        self.record("upsert_contact", Some(contact.email.clone()))?;
        let mut state = self.state();
        let key = contact.email.to_lowercase();
        if let Some((id, props)) = state.contacts.get_mut(&key) {
            *props = contact.clone();
            return Ok(id.clone());
        }
        let id = CrmContactId::new(state.issue_id().to_string());
        state.contacts.insert(key, (id.clone(), contact.clone()));
        Ok(id)
    }

    async fn create_deal(
        &self,
        deal: &DealProperties,
        contact: &CrmContactId,
    ) -> Result<CrmDealId, CrmError> {
        self.record("create_deal", Some(contact.to_string()))?;
        let mut state = self.state();
        let key = state.issue_id();
        state.deals.insert(
            key,
            FakeDeal {
                stage: Some(deal.dealstage.as_str().to_string()),
                first_subscription_date: None,
                properties: Some(deal.clone()),
                contact: Some(contact.clone()),
            },
        );
        Ok(CrmDealId::new(key.to_string()))
    }

    async fn update_deal(&self, deal_id: &CrmDealId, deal: &DealProperties) -> Result<(), CrmError> {
        self.record("update_deal", Some(deal_id.to_string()))?;
        self.patch(deal_id, |stored| {
            stored.stage = Some(deal.dealstage.as_str().to_string());
            stored.properties = Some(deal.clone());
        })
    }

    async fn update_deal_stage(
        &self,
        deal_id: &CrmDealId,
        stage: DealStage,
    ) -> Result<(), CrmError> {
        self.record("update_deal_stage", Some(deal_id.to_string()))?;
        self.patch(deal_id, |stored| {
            stored.stage = Some(stage.as_str().to_string());
        })
    }

    async fn list_deals(&self, after: Option<&str>) -> Result<DealPage, CrmError> {
        self.record("list_deals", after.map(str::to_string))?;
        let state = self.state();
        let page_size = state.page_size.unwrap_or(100);
        let offset: usize = match after {
            Some(cursor) => cursor
                .parse()
                .map_err(|_| CrmError::from_status(400, format!("bad cursor {}", cursor)))?,
            None => 0,
        };
        if state.failing_page == Some(offset / page_size) {
            return Err(CrmError::from_status(502, "injected listing failure"));
        }

        let deals: Vec<DealSnapshot> = state
            .deals
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|(key, deal)| DealSnapshot {
                id: CrmDealId::new(key.to_string()),
                stage: deal.stage.clone(),
                first_subscription_date: deal.first_subscription_date.clone(),
            })
            .collect();
        let next = offset + deals.len();
        Ok(DealPage {
            next_after: (next < state.deals.len()).then(|| next.to_string()),
            deals,
        })
    }

    async fn create_invoice(
        &self,
        invoice: &InvoiceProperties,
        contact: &CrmContactId,
        deal: &CrmDealId,
    ) -> Result<CrmInvoiceId, CrmError> {
        self.record("create_invoice", Some(deal.to_string()))?;
        let mut state = self.state();
        let id = CrmInvoiceId::new(state.issue_id().to_string());
        state.invoices.insert(
            id.clone(),
            FakeInvoice {
                properties: invoice.clone(),
                contact: contact.clone(),
                deal: deal.clone(),
            },
        );
        Ok(id)
    }

    async fn create_line_item(
        &self,
        line_item: &LineItemProperties,
        invoice: &CrmInvoiceId,
    ) -> Result<CrmLineItemId, CrmError> {
        self.record("create_line_item", Some(invoice.to_string()))?;
        let mut state = self.state();
        let id = CrmLineItemId::new(state.issue_id().to_string());
        state
            .line_items
            .insert(id.clone(), (line_item.clone(), invoice.clone()));
        Ok(id)
    }

    async fn create_payment(
        &self,
        payment: &PaymentProperties,
        line_item: &CrmLineItemId,
    ) -> Result<CrmPaymentId, CrmError> {
        self.record("create_payment", Some(line_item.to_string()))?;
        let mut state = self.state();
        let id = CrmPaymentId::new(state.issue_id().to_string());
        state
            .payments
            .insert(id.clone(), (payment.clone(), line_item.clone()));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_contact_is_keyed_by_email() {
        let crm = InMemoryCrm::new();
        let contact = ContactProperties::from_display_name("ana@example.com", "Ana López");

        let first = crm.upsert_contact(&contact).await.unwrap();
        let second = crm.upsert_contact(&contact).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(crm.contact_count(), 1);
    }

    #[tokio::test]
    async fn list_deals_pages_with_cursor() {
        let crm = InMemoryCrm::new();
        crm.set_page_size(2);
        for _ in 0..5 {
            crm.seed_deal(Some("contractsent"), None);
        }

        let first = crm.list_deals(None).await.unwrap();
        let second = crm.list_deals(first.next_after.as_deref()).await.unwrap();
        let third = crm.list_deals(second.next_after.as_deref()).await.unwrap();

        assert_eq!(first.deals.len(), 2);
        assert_eq!(second.deals.len(), 2);
        assert_eq!(third.deals.len(), 1);
        assert!(third.next_after.is_none());
    }

    #[tokio::test]
    async fn failing_deal_rejects_patches_only_for_that_deal() {
        let crm = InMemoryCrm::new();
        let bad = crm.seed_deal(Some("contractsent"), None);
        let good = crm.seed_deal(Some("contractsent"), None);
        crm.fail_deal(&bad);

        let bad_result = crm.update_deal_stage(&bad, DealStage::ClosedLost).await;
        let good_result = crm.update_deal_stage(&good, DealStage::ClosedLost).await;

        assert!(bad_result.is_err());
        assert!(good_result.is_ok());
        assert_eq!(crm.deal(&good).unwrap().stage.as_deref(), Some("closedlost"));
    }

    #[tokio::test]
    async fn patching_unknown_deal_is_not_found() {
        let crm = InMemoryCrm::new();

        let err = crm
            .update_deal_stage(&CrmDealId::new("999"), DealStage::ClosedWon)
            .await
            .unwrap_err();

        assert_eq!(err.status, Some(404));
    }
}
