//! PostgreSQL adapters - Database implementations for repository ports.
//!
//! - `PostgresLedgerStore` - Users, subscriptions and CRM linkage
//! - `PostgresWebhookEventRepository` - Processed Stripe event ids
//! - `connect` / `run_migrations` - Pool construction from `DatabaseConfig`

mod ledger_store;
mod pool;
mod webhook_event_repository;

pub use ledger_store::PostgresLedgerStore;
pub use pool::{connect, run_migrations};
pub use webhook_event_repository::PostgresWebhookEventRepository;
