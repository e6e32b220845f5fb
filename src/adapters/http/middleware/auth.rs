//! Authentication middleware and extractors for axum.
//!
//! This module provides:
//! - `JwtVerifier` - Verifies HS256 bearer tokens whose `sub` is a user UUID
//! - `auth_middleware` - Layer that validates Bearer tokens and injects the user into extensions
//! - `RequireAuth` - Extractor that requires authentication
//!
//! ```text
//! Request → auth_middleware → injects AuthenticatedUser into extensions
//!                                      ↓
//!                              Handler → RequireAuth extractor reads from extensions
//! ```
//!
//! Token issuance lives in the account service; only verification happens here.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

use crate::config::AuthConfig;
use crate::domain::foundation::UserId;

/// The caller, as proven by a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// HS256 bearer token verifier.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &config.jwt_issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => {
                    tracing::debug!("Token expired");
                    AuthError::TokenExpired
                }
                _ => {
                    tracing::warn!("Token validation failed: {}", e);
                    AuthError::InvalidToken
                }
            }
        })?;

        let user_id = data.claims.sub.parse::<UserId>().map_err(|_| {
            tracing::warn!("Token subject is not a user id");
            AuthError::InvalidToken
        })?;

        Ok(AuthenticatedUser { user_id })
    }
}

/// Auth middleware state.
pub type AuthState = Arc<JwtVerifier>;

/// Authentication middleware that validates Bearer tokens.
///
/// Expects `Authorization: Bearer <token>`. Missing or invalid tokens are
/// answered with 401; a valid one puts [`AuthenticatedUser`] into the
/// request extensions.
pub async fn auth_middleware(
    State(verifier): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return AuthRejection::Unauthenticated.into_response();
    };

    match verifier.verify(token) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => AuthRejection::Invalid(e).into_response(),
    }
}

/// Extractor that requires authentication.
///
/// ```ignore
/// async fn my_handler(RequireAuth(user): RequireAuth) -> impl IntoResponse {
///     format!("Hello, {}!", user.user_id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireAuth(pub AuthenticatedUser);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(RequireAuth)
            .ok_or(AuthRejection::Unauthenticated)
    }
}

/// Rejection type for authentication failures.
#[derive(Debug, Clone)]
pub enum AuthRejection {
    /// No token was provided.
    Unauthenticated,
    /// A token was provided and failed verification.
    Invalid(AuthError),
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let message = match &self {
            AuthRejection::Unauthenticated => "Authentication required",
            AuthRejection::Invalid(AuthError::TokenExpired) => "Token expired",
            AuthRejection::Invalid(AuthError::InvalidToken) => "Invalid token",
        };

        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": message,
                "code": "UNAUTHENTICATED"
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    const SECRET: &str = "test-secret";

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        exp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        iss: Option<&'a str>,
    }

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: SECRET.to_string(),
            ..Default::default()
        }
    }

    fn token(sub: &str, exp_offset: i64, secret: &str, iss: Option<&str>) -> String {
        let claims = TestClaims {
            sub,
            exp: chrono::Utc::now().timestamp() + exp_offset,
            iss,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // JwtVerifier Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn valid_token_yields_user() {
        let user_id = UserId::new();
        let verifier = JwtVerifier::new(&config());

        let user = verifier
            .verify(&token(&user_id.to_string(), 3600, SECRET, None))
            .unwrap();

        assert_eq!(user.user_id, user_id);
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let verifier = JwtVerifier::new(&config());

        let result = verifier.verify(&token(&UserId::new().to_string(), 3600, "other", None));

        assert_eq!(result, Err(AuthError::InvalidToken));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let verifier = JwtVerifier::new(&config());

        let result = verifier.verify(&token(&UserId::new().to_string(), -3600, SECRET, None));

        assert_eq!(result, Err(AuthError::TokenExpired));
    }

    #[test]
    fn non_uuid_subject_is_invalid() {
        let verifier = JwtVerifier::new(&config());

        let result = verifier.verify(&token("user-123", 3600, SECRET, None));

        assert_eq!(result, Err(AuthError::InvalidToken));
    }

    #[test]
    fn issuer_is_checked_when_configured() {
        let verifier = JwtVerifier::new(&AuthConfig {
            jwt_issuer: Some("https://accounts.copydesk.test".to_string()),
            ..config()
        });
        let sub = UserId::new().to_string();

        assert!(verifier
            .verify(&token(&sub, 3600, SECRET, Some("https://accounts.copydesk.test")))
            .is_ok());
        assert!(verifier.verify(&token(&sub, 3600, SECRET, Some("https://evil.test"))).is_err());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // RequireAuth Extractor Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn require_auth_extracts_user_from_extensions() {
        let user = AuthenticatedUser {
            user_id: UserId::new(),
        };
        let mut request = axum::http::Request::builder().uri("/test").body(()).unwrap();
        request.extensions_mut().insert(user.clone());
        let (mut parts, _body) = request.into_parts();

        let RequireAuth(extracted) = RequireAuth::from_request_parts(&mut parts, &()).await.unwrap();

        assert_eq!(extracted, user);
    }

    #[tokio::test]
    async fn require_auth_fails_without_user() {
        let request = axum::http::Request::builder().uri("/test").body(()).unwrap();
        let (mut parts, _body) = request.into_parts();

        let result = RequireAuth::from_request_parts(&mut parts, &()).await;

        assert!(matches!(result, Err(AuthRejection::Unauthenticated)));
    }
}
