//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `LedgerStore` - Users, subscriptions and CRM linkage
//! - `WebhookEventRepository` - Stripe webhook idempotency tracking
//! - `PaymentProvider` - Stripe customers, checkout and subscriptions
//! - `CrmClient` - HubSpot contacts, deals, invoices, line items, payments

mod crm_client;
mod ledger_store;
mod payment_provider;
mod webhook_event_repository;

pub use crm_client::{
    ContactProperties, CrmClient, CrmError, CrmErrorCode, DealPage, DealProperties, DealSnapshot,
    InvoiceProperties, LineItemProperties, PaymentProperties,
};
pub use ledger_store::{InvoiceClaim, LedgerStore, LinkOutcome};
pub use payment_provider::{
    CheckoutSession, CreateCheckoutRequest, CreateCustomerRequest, Customer, PaymentError,
    PaymentErrorCode, PaymentProvider, ProviderSubscription,
};
pub use webhook_event_repository::{
    ProcessingResult, SaveResult, WebhookEventRecord, WebhookEventRepository,
};
