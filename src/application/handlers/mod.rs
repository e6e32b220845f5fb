//! Application handlers.
//!
//! Command handlers and background services that orchestrate domain
//! operations.

pub mod billing;
