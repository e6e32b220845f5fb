//! Errors for the user-facing billing commands (checkout, cancel).
//!
//! # HTTP Status Mapping
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | UserNotFound | 404 |
//! | NoActiveSubscription | 404 |
//! | AlreadyActive | 409 |
//! | Provider | 502 |
//! | Infrastructure | 500 |

use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// Checkout requested while the user already pays.
    #[error("Subscription already active for user {0}")]
    AlreadyActive(UserId),

    #[error("No active subscription for user {0}")]
    NoActiveSubscription(UserId),

    /// Stripe rejected or failed the request.
    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl BillingError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BillingError::UserNotFound(_) => ErrorCode::UserNotFound,
            BillingError::AlreadyActive(_) => ErrorCode::SubscriptionExists,
            BillingError::NoActiveSubscription(_) => ErrorCode::SubscriptionNotFound,
            BillingError::Provider(_) => ErrorCode::ExternalServiceError,
            BillingError::Infrastructure(_) => ErrorCode::DatabaseError,
        }
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        BillingError::Infrastructure(err.to_string())
    }
}
