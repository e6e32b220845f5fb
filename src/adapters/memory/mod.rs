//! In-memory adapters for tests and local development.

mod in_memory_ledger_store;
mod in_memory_webhook_events;

pub use in_memory_ledger_store::InMemoryLedgerStore;
pub use in_memory_webhook_events::InMemoryWebhookEventRepository;
