//! Foundation module - Shared domain primitives.
//!
//! Contains identifiers, timestamps and the error type shared by every
//! layer of the Copydesk billing domain.

mod errors;
mod ids;
mod timestamp;

pub use errors::{DomainError, ErrorCode};
pub use ids::{SubscriptionId, UserId};
pub use timestamp::Timestamp;
