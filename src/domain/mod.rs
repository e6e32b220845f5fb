//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors)
//! - `billing` - Subscription lifecycle, webhook verification and decoding,
//!   CRM linkage and deal stages

pub mod billing;
pub mod foundation;
