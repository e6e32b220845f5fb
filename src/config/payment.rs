//! Payment configuration (Stripe)

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Payment configuration (Stripe)
///
/// Each webhook route is registered as its own Stripe endpoint, so each has
/// its own signing secret.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentConfig {
    /// Stripe API key
    pub stripe_api_key: String,

    /// Signing secret of the `subscribed` endpoint
    pub webhook_secret_subscribed: String,

    /// Signing secret of the `payment-succeeded` endpoint
    pub webhook_secret_payment_succeeded: String,

    /// Signing secret of the `updated` endpoint
    pub webhook_secret_updated: String,

    /// Price the checkout command subscribes to
    pub price_id: String,

    /// Frontend base URL for checkout success/cancel redirects
    pub client_url: String,

    /// Reject events whose `livemode` is false
    #[serde(default)]
    pub require_livemode: bool,

    /// Stripe request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl PaymentConfig {
    /// Check if using Stripe test mode
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_test_")
    }

    /// Check if using Stripe live mode
    pub fn is_live_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_live_")
    }

    pub fn success_url(&self) -> String {
        format!("{}/stripe/success", self.client_url.trim_end_matches('/'))
    }

    pub fn cancel_url(&self) -> String {
        format!("{}/stripe/cancel", self.client_url.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate payment configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stripe_api_key.is_empty() {
            return Err(ValidationError::MissingRequired("COPYDESK__PAYMENT__STRIPE_API_KEY"));
        }
        if !self.stripe_api_key.starts_with("sk_") && !self.stripe_api_key.starts_with("rk_") {
            return Err(ValidationError::InvalidStripeKey);
        }

        for (name, secret) in [
            ("subscribed", &self.webhook_secret_subscribed),
            ("payment-succeeded", &self.webhook_secret_payment_succeeded),
            ("updated", &self.webhook_secret_updated),
        ] {
            if !secret.starts_with("whsec_") {
                return Err(ValidationError::InvalidStripeWebhookSecret(name));
            }
        }

        if self.price_id.is_empty() {
            return Err(ValidationError::MissingRequired("COPYDESK__PAYMENT__PRICE_ID"));
        }
        if !self.client_url.starts_with("http://") && !self.client_url.starts_with("https://") {
            return Err(ValidationError::InvalidClientUrl);
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }

        Ok(())
    }
}

fn default_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PaymentConfig {
        PaymentConfig {
            stripe_api_key: "sk_test_xxx".to_string(),
            webhook_secret_subscribed: "whsec_a".to_string(),
            webhook_secret_payment_succeeded: "whsec_b".to_string(),
            webhook_secret_updated: "whsec_c".to_string(),
            price_id: "price_pro".to_string(),
            client_url: "https://app.copydesk.io/".to_string(),
            require_livemode: false,
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_is_test_mode() {
        let config = valid();
        assert!(config.is_test_mode());
        assert!(!config.is_live_mode());
    }

    #[test]
    fn test_redirect_urls_strip_trailing_slash() {
        let config = valid();
        assert_eq!(config.success_url(), "https://app.copydesk.io/stripe/success");
        assert_eq!(config.cancel_url(), "https://app.copydesk.io/stripe/cancel");
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validation_names_bad_webhook_secret() {
        let config = PaymentConfig {
            webhook_secret_updated: "not-a-secret".to_string(),
            ..valid()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidStripeWebhookSecret("updated"))
        );
    }

    #[test]
    fn test_validation_invalid_key_prefix() {
        let config = PaymentConfig {
            stripe_api_key: "pk_test_xxx".to_string(),
            ..valid()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidStripeKey));
    }

    #[test]
    fn test_validation_relative_client_url() {
        let config = PaymentConfig {
            client_url: "app.copydesk.io".to_string(),
            ..valid()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidClientUrl));
    }
}
