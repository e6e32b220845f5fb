//! Stripe payment provider adapter.
//!
//! Implements the `PaymentProvider` trait against the Stripe REST API:
//! form-encoded requests, basic auth with the secret key, JSON responses.
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::new(api_key).with_timeout(Duration::from_secs(30));
//! let adapter = StripePaymentAdapter::new(config)?;
//! ```

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::domain::billing::stripe_event::StripeSubscription;
use crate::domain::billing::{Cancellation, SubscriptionStatus};
use crate::domain::foundation::Timestamp;
use crate::ports::{
    CheckoutSession, CreateCheckoutRequest, CreateCustomerRequest, Customer, PaymentError,
    PaymentErrorCode, PaymentProvider, ProviderSubscription,
};

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Base URL for Stripe API (default: https://api.stripe.com).
    api_base_url: String,

    /// Per-request timeout.
    timeout: Duration,
}

impl StripeConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Stripe payment provider adapter.
pub struct StripePaymentAdapter {
    config: StripeConfig,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StripeCustomerResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl StripePaymentAdapter {
    pub fn new(config: StripeConfig) -> Result<Self, PaymentError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::provider(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<Option<T>, PaymentError> {
        let response = request
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                operation,
                status = status.as_u16(),
                error = %error_text,
                "Stripe request failed"
            );
            return Err(error_from_response(status.as_u16(), &error_text));
        }

        response.json::<T>().await.map(Some).map_err(|e| {
            PaymentError::provider(format!("Failed to parse Stripe response: {}", e))
        })
    }
}

#[async_trait]
impl PaymentProvider for StripePaymentAdapter {
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<Customer, PaymentError> {
        let mut params = vec![
            ("email", request.email.clone()),
            ("metadata[user_id]", request.user_id.to_string()),
        ];
        if let Some(name) = &request.name {
            params.push(("name", name.clone()));
        }

        let customer: StripeCustomerResponse = self
            .send(
                self.http_client.post(self.url("customers")).form(&params),
                "create_customer",
            )
            .await?
            .ok_or_else(|| PaymentError::not_found("Customer endpoint"))?;

        Ok(Customer {
            id: customer.id,
            email: customer.email.or(Some(request.email)),
        })
    }

    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let params = checkout_params(&request);

        let session: StripeCheckoutSessionResponse = self
            .send(
                self.http_client.post(self.url("checkout/sessions")).form(&params),
                "create_checkout_session",
            )
            .await?
            .ok_or_else(|| PaymentError::not_found("Price"))?;

        let url = session
            .url
            .ok_or_else(|| PaymentError::provider("Checkout session has no URL"))?;

        Ok(CheckoutSession { id: session.id, url })
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<ProviderSubscription>, PaymentError> {
        let subscription: Option<StripeSubscription> = self
            .send(
                self.http_client
                    .get(self.url(&format!("subscriptions/{}", subscription_id))),
                "get_subscription",
            )
            .await?;

        subscription.map(to_provider_subscription).transpose()
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> Result<ProviderSubscription, PaymentError> {
        let params = [("cancel_at_period_end", cancel_at_period_end.to_string())];

        let subscription: StripeSubscription = self
            .send(
                self.http_client
                    .post(self.url(&format!("subscriptions/{}", subscription_id)))
                    .form(&params),
                "set_cancel_at_period_end",
            )
            .await?
            .ok_or_else(|| PaymentError::not_found("Subscription"))?;

        to_provider_subscription(subscription)
    }
}

fn checkout_params(request: &CreateCheckoutRequest) -> Vec<(&'static str, String)> {
    vec![
        ("mode", "subscription".to_string()),
        ("customer", request.customer_id.clone()),
        ("line_items[0][price]", request.price_id.clone()),
        ("line_items[0][quantity]", "1".to_string()),
        ("success_url", request.success_url.clone()),
        ("cancel_url", request.cancel_url.clone()),
        ("metadata[user_id]", request.user_id.to_string()),
    ]
}

fn map_transport_error(err: reqwest::Error) -> PaymentError {
    if err.is_timeout() {
        PaymentError::network(format!("Stripe request timed out: {}", err))
    } else {
        PaymentError::network(err.to_string())
    }
}

fn error_from_response(status: u16, body: &str) -> PaymentError {
    let code = match status {
        401 | 403 => PaymentErrorCode::AuthenticationError,
        400 | 402 => PaymentErrorCode::InvalidRequest,
        429 => PaymentErrorCode::RateLimitExceeded,
        500..=599 => PaymentErrorCode::NetworkError,
        _ => PaymentErrorCode::ProviderError,
    };

    match serde_json::from_str::<StripeErrorEnvelope>(body) {
        Ok(envelope) => {
            let message = envelope
                .error
                .message
                .unwrap_or_else(|| format!("Stripe API error ({})", status));
            let err = PaymentError::new(code, message);
            match envelope.error.code {
                Some(provider_code) => err.with_provider_code(provider_code),
                None => err,
            }
        }
        Err(_) => PaymentError::new(code, format!("Stripe API error ({}): {}", status, body)),
    }
}

fn to_provider_subscription(sub: StripeSubscription) -> Result<ProviderSubscription, PaymentError> {
    let status = sub
        .status
        .parse::<SubscriptionStatus>()
        .map_err(|e| PaymentError::provider(e.to_string()))?;

    let price = sub
        .primary_price()
        .cloned()
        .ok_or_else(|| PaymentError::provider("Subscription has no items"))?;

    let period_start = sub
        .current_period_start
        .or(sub.start_date)
        .and_then(Timestamp::from_unix_secs)
        .unwrap_or_default();
    let period_end = Timestamp::from_optional_unix_secs(sub.current_period_end)
        .unwrap_or_else(|| period_start.add_days(30));

    let currency = sub
        .currency
        .clone()
        .or_else(|| price.currency.clone())
        .unwrap_or_default();

    Ok(ProviderSubscription {
        id: sub.id,
        customer_id: sub.customer,
        status,
        price_id: price.id,
        plan_name: price.nickname,
        currency,
        current_period_start: period_start,
        current_period_end: period_end,
        cancellation: Cancellation {
            cancel_at: Timestamp::from_optional_unix_secs(sub.cancel_at),
            cancel_at_period_end: sub.cancel_at_period_end,
            canceled_at: Timestamp::from_optional_unix_secs(sub.canceled_at),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::UserId;

    fn stripe_subscription(json: serde_json::Value) -> StripeSubscription {
        serde_json::from_value(json).unwrap()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn config_new_sets_defaults() {
        let config = StripeConfig::new(SecretString::new("sk_test_key".to_string()));
        assert_eq!(config.api_base_url, "https://api.stripe.com");
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn config_with_base_url() {
        let config = StripeConfig::new(SecretString::new("key".to_string()))
            .with_base_url("http://localhost:12111");
        assert_eq!(config.api_base_url, "http://localhost:12111");
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Request Building
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn checkout_params_carry_price_and_user_metadata() {
        let user_id = UserId::new();
        let request = CreateCheckoutRequest {
            user_id,
            customer_id: "cus_1".to_string(),
            price_id: "price_pro".to_string(),
            success_url: "https://app.example.com/stripe/success".to_string(),
            cancel_url: "https://app.example.com/stripe/cancel".to_string(),
        };

        let params = checkout_params(&request);

        assert!(params.contains(&("mode", "subscription".to_string())));
        assert!(params.contains(&("customer", "cus_1".to_string())));
        assert!(params.contains(&("line_items[0][price]", "price_pro".to_string())));
        assert!(params.contains(&("metadata[user_id]", user_id.to_string())));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Response Mapping
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn maps_subscription_fields() {
        let sub = stripe_subscription(serde_json::json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "active",
            "currency": "usd",
            "current_period_start": 1704067200,
            "current_period_end": 1706745600,
            "cancel_at_period_end": false,
            "items": {"data": [{"id": "si_1", "price": {"id": "price_1", "nickname": "Pro"}}]}
        }));

        let mapped = to_provider_subscription(sub).unwrap();

        assert_eq!(mapped.status, SubscriptionStatus::Active);
        assert_eq!(mapped.price_id, "price_1");
        assert_eq!(mapped.plan_name.as_deref(), Some("Pro"));
        assert_eq!(mapped.current_period_end.as_unix_secs(), 1_706_745_600);
    }

    #[test]
    fn period_start_falls_back_to_start_date() {
        let sub = stripe_subscription(serde_json::json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "incomplete",
            "start_date": 1704067200,
            "items": {"data": [{"id": "si_1", "price": {"id": "price_1", "currency": "eur"}}]}
        }));

        let mapped = to_provider_subscription(sub).unwrap();

        assert_eq!(mapped.current_period_start.as_unix_secs(), 1_704_067_200);
        assert_eq!(mapped.currency, "eur");
    }

    #[test]
    fn subscription_without_items_is_an_error() {
        let sub = stripe_subscription(serde_json::json!({
            "id": "sub_1", "customer": "cus_1", "status": "active"
        }));

        assert!(to_provider_subscription(sub).is_err());
    }

    #[test]
    fn error_body_is_parsed() {
        let body = r#"{"error":{"code":"resource_missing","message":"No such price: 'price_x'"}}"#;

        let err = error_from_response(400, body);

        assert_eq!(err.code, PaymentErrorCode::InvalidRequest);
        assert_eq!(err.provider_code.as_deref(), Some("resource_missing"));
        assert!(err.message.contains("No such price"));
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(error_from_response(503, "unavailable").retryable);
        assert!(!error_from_response(401, "bad key").retryable);
    }
}
