//! HubSpot CRM adapters.
//!
//! - `HubSpotClient` - CRM v3 REST client (bearer token)
//! - `InMemoryCrm` - fake with call logging and failure injection

mod hubspot_client;
mod in_memory_crm;
mod wire;

pub use hubspot_client::{HubSpotClient, HubSpotConfig};
pub use in_memory_crm::{CrmCall, FakeDeal, FakeInvoice, InMemoryCrm};
