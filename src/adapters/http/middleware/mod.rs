//! HTTP middleware for axum.
//!
//! - `auth` - Bearer token verification and extractors

pub mod auth;

pub use auth::{
    auth_middleware, AuthError, AuthRejection, AuthState, AuthenticatedUser, JwtVerifier,
    RequireAuth,
};
