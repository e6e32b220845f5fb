//! CrmSynchronizer - Translates ledger state into CRM objects.
//!
//! Owns the mapping between local records and remote ids. A remote id, once
//! stored on the user, is reused; a missing one is created and persisted
//! before anything that associates to it. The contact → deal → invoice →
//! line item → payment chain runs strictly in order and stops at the first
//! failure.
//!
//! A paid invoice is built under a claim taken in the ledger. Only the
//! claimant calls the CRM; a chain that stops part-way is marked interrupted
//! and the next delivery of that invoice picks up after the last object it
//! created.

use std::sync::Arc;
use thiserror::Error;

use crate::domain::billing::{
    CrmContactId, CrmDealId, CrmInvoiceId, CrmPaymentId, DealStage, InvoiceChainState,
    InvoicePaid, InvoiceResume, Subscription, User, WebhookError, to_major_units,
};
use crate::domain::foundation::DomainError;
use crate::ports::{
    ContactProperties, CrmClient, CrmError, DealPage, DealProperties, InvoiceClaim,
    InvoiceProperties, LedgerStore, LineItemProperties, LinkOutcome, PaymentProperties,
};

const FALLBACK_LINE_ITEM_NAME: &str = "Subscription payment";

/// A failed synchronization step.
#[derive(Debug, Clone, Error)]
pub enum CrmSyncError {
    #[error("CRM call failed at {step}: {source}")]
    Crm {
        step: &'static str,
        #[source]
        source: CrmError,
    },

    #[error("Ledger write failed at {step}: {source}")]
    Ledger {
        step: &'static str,
        #[source]
        source: DomainError,
    },
}

impl CrmSyncError {
    fn crm(step: &'static str) -> impl FnOnce(CrmError) -> Self {
        move |source| CrmSyncError::Crm { step, source }
    }

    fn ledger(step: &'static str) -> impl FnOnce(DomainError) -> Self {
        move |source| CrmSyncError::Ledger { step, source }
    }
}

/// What recording a paid invoice did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceRecording {
    Recorded {
        invoice_id: CrmInvoiceId,
        payment_id: CrmPaymentId,
    },
    /// The user has no contact or deal to associate the invoice with.
    LinkageMissing,
    /// Already recorded, or another delivery is recording it.
    AlreadyClaimed,
}

impl From<CrmSyncError> for WebhookError {
    fn from(err: CrmSyncError) -> Self {
        match err {
            CrmSyncError::Crm { .. } => WebhookError::Crm(err.to_string()),
            CrmSyncError::Ledger { .. } => WebhookError::Database(err.to_string()),
        }
    }
}

pub struct CrmSynchronizer {
    crm: Arc<dyn CrmClient>,
    ledger: Arc<dyn LedgerStore>,
    pipeline: String,
}

impl CrmSynchronizer {
    pub fn new(crm: Arc<dyn CrmClient>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self {
            crm,
            ledger,
            pipeline: "default".to_string(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = pipeline.into();
        self
    }

    /// Upserts the user's contact by email and stores the id if it changed.
    pub async fn upsert_contact(&self, user: &User) -> Result<CrmContactId, CrmSyncError> {
        let properties = ContactProperties::from_display_name(&user.email, &user.name);
        let contact_id = self
            .crm
            .upsert_contact(&properties)
            .await
            .map_err(CrmSyncError::crm("upsert contact"))?;

        if user.billing.crm_contact_id.as_ref() != Some(&contact_id) {
            self.ledger
                .set_crm_contact_id(&user.id, &contact_id)
                .await
                .map_err(CrmSyncError::ledger("store contact id"))?;
        }

        Ok(contact_id)
    }

    /// Patches the user's deal, or creates and links one.
    ///
    /// The link is a compare-and-set: if another delivery linked a deal
    /// first, that deal is kept and patched, and the one just created is
    /// reported as an orphan.
    pub async fn upsert_deal(
        &self,
        user: &User,
        subscription: &Subscription,
    ) -> Result<CrmDealId, CrmSyncError> {
        let properties = self.deal_properties(user, subscription);

        if let Some(deal_id) = &user.billing.crm_deal_id {
            self.crm
                .update_deal(deal_id, &properties)
                .await
                .map_err(CrmSyncError::crm("update deal"))?;
            tracing::debug!(user_id = %user.id, deal_id = %deal_id, stage = %properties.dealstage, "Deal updated");
            return Ok(deal_id.clone());
        }

        let contact_id = match &user.billing.crm_contact_id {
            Some(id) => id.clone(),
            None => self.upsert_contact(user).await?,
        };

        let created = self
            .crm
            .create_deal(&properties, &contact_id)
            .await
            .map_err(CrmSyncError::crm("create deal"))?;

        match self
            .ledger
            .link_crm_deal(&user.id, &created)
            .await
            .map_err(CrmSyncError::ledger("link deal"))?
        {
            LinkOutcome::Linked => {
                tracing::info!(user_id = %user.id, deal_id = %created, "Deal created");
                Ok(created)
            }
            LinkOutcome::AlreadyLinked(existing) => {
                tracing::warn!(
                    user_id = %user.id,
                    deal_id = %existing,
                    orphan_deal_id = %created,
                    "Deal linked concurrently; keeping stored deal"
                );
                self.crm
                    .update_deal(&existing, &properties)
                    .await
                    .map_err(CrmSyncError::crm("update deal"))?;
                Ok(existing)
            }
        }
    }

    /// Contact then deal, for a freshly created subscription.
    pub async fn sync_subscription(
        &self,
        user: &User,
        subscription: &Subscription,
    ) -> Result<CrmDealId, CrmSyncError> {
        let contact_id = self.upsert_contact(user).await?;
        let mut user = user.clone();
        user.billing.crm_contact_id = Some(contact_id);
        self.upsert_deal(&user, subscription).await
    }

    /// Records a paid invoice as invoice, line item and payment.
    ///
    /// Makes no CRM call without both a contact and a deal, or when the
    /// claim on this invoice is held elsewhere.
    pub async fn record_paid_invoice(
        &self,
        user: &User,
        invoice: &InvoicePaid,
    ) -> Result<InvoiceRecording, CrmSyncError> {
        let Some((contact_id, deal_id)) = user.billing.invoice_targets() else {
            return Ok(InvoiceRecording::LinkageMissing);
        };

        let resume = match self
            .ledger
            .claim_invoice(&user.id, &invoice.invoice_id)
            .await
            .map_err(CrmSyncError::ledger("claim invoice"))?
        {
            InvoiceClaim::Claimed(resume) => resume,
            InvoiceClaim::Held => return Ok(InvoiceRecording::AlreadyClaimed),
        };
        if resume != InvoiceResume::default() {
            tracing::info!(
                user_id = %user.id,
                stripe_invoice_id = %invoice.invoice_id,
                "Resuming interrupted invoice chain"
            );
        }

        let chain = self
            .build_invoice_chain(user, contact_id, deal_id, invoice, resume)
            .await;
        let finished = match &chain {
            Ok(_) => InvoiceChainState::Recorded,
            Err(_) => InvoiceChainState::Interrupted,
        };
        let settled = self
            .ledger
            .finish_invoice_claim(&user.id, &invoice.invoice_id, finished)
            .await
            .map_err(CrmSyncError::ledger("finish invoice claim"));

        // If both fail, the claim stays taken until it times out.
        let (invoice_id, payment_id) = chain?;
        settled?;
        tracing::info!(
            user_id = %user.id,
            invoice_id = %invoice_id,
            payment_id = %payment_id,
            stripe_invoice_id = %invoice.invoice_id,
            "Invoice recorded"
        );
        Ok(InvoiceRecording::Recorded {
            invoice_id,
            payment_id,
        })
    }

    /// Creates whatever part of the chain `resume` does not already hold,
    /// storing each id before the next step associates to it.
    async fn build_invoice_chain(
        &self,
        user: &User,
        contact_id: &CrmContactId,
        deal_id: &CrmDealId,
        invoice: &InvoicePaid,
        resume: InvoiceResume,
    ) -> Result<(CrmInvoiceId, CrmPaymentId), CrmSyncError> {
        let invoice_id = match resume.invoice_id {
            Some(id) => id,
            None => {
                let properties = InvoiceProperties {
                    stripe_invoice_id: invoice.invoice_id.clone(),
                    currency: invoice.currency.clone(),
                    amount: invoice.amount_paid_major(),
                    invoice_date: invoice.paid_at,
                };
                let id = self
                    .crm
                    .create_invoice(&properties, contact_id, deal_id)
                    .await
                    .map_err(CrmSyncError::crm("create invoice"))?;
                self.ledger
                    .set_crm_invoice_id(&user.id, &id, &invoice.invoice_id)
                    .await
                    .map_err(CrmSyncError::ledger("store invoice id"))?;
                id
            }
        };

        let line_item_id = match resume.line_item_id {
            Some(id) => id,
            None => {
                let id = self
                    .crm
                    .create_line_item(&line_item_for(invoice), &invoice_id)
                    .await
                    .map_err(CrmSyncError::crm("create line item"))?;
                self.ledger
                    .set_crm_line_item_id(&user.id, &id, &invoice.invoice_id)
                    .await
                    .map_err(CrmSyncError::ledger("store line item id"))?;
                id
            }
        };

        let payment = PaymentProperties {
            amount: invoice.amount_paid_major(),
            currency: invoice.currency.clone(),
            payment_date: invoice.paid_at,
            stripe_invoice_id: invoice.invoice_id.clone(),
        };
        let payment_id = self
            .crm
            .create_payment(&payment, &line_item_id)
            .await
            .map_err(CrmSyncError::crm("create payment"))?;

        Ok((invoice_id, payment_id))
    }

    /// Patches only a deal's stage.
    pub async fn correct_stage(
        &self,
        deal_id: &CrmDealId,
        stage: DealStage,
    ) -> Result<(), CrmSyncError> {
        self.crm
            .update_deal_stage(deal_id, stage)
            .await
            .map_err(CrmSyncError::crm("correct stage"))
    }

    pub async fn list_deals(&self, after: Option<&str>) -> Result<DealPage, CrmSyncError> {
        self.crm
            .list_deals(after)
            .await
            .map_err(CrmSyncError::crm("list deals"))
    }

    fn deal_properties(&self, user: &User, subscription: &Subscription) -> DealProperties {
        DealProperties {
            dealname: format!("{} – {}", subscription.plan_name, user.email),
            dealstage: DealStage::for_status(subscription.status()),
            pipeline: self.pipeline.clone(),
            stripe_subscription_id: subscription.external_subscription_id.clone(),
        }
    }
}

/// The invoice's first line, or the whole amount as one item.
fn line_item_for(invoice: &InvoicePaid) -> LineItemProperties {
    match invoice.lines.first() {
        Some(line) => LineItemProperties {
            name: if line.description.is_empty() {
                FALLBACK_LINE_ITEM_NAME.to_string()
            } else {
                line.description.clone()
            },
            quantity: line.quantity.max(1),
            price: to_major_units(line.unit_amount),
        },
        None => LineItemProperties {
            name: FALLBACK_LINE_ITEM_NAME.to_string(),
            quantity: 1,
            price: invoice.amount_paid_major(),
        },
    }
}
