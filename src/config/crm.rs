//! CRM configuration (HubSpot)

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct CrmConfig {
    /// HubSpot private app access token
    pub hubspot_access_token: String,

    #[serde(default = "default_base_url")]
    pub hubspot_base_url: String,

    /// Pipeline new deals are created in
    #[serde(default = "default_pipeline")]
    pub pipeline: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl CrmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.hubspot_access_token.is_empty() {
            return Err(ValidationError::MissingRequired(
                "COPYDESK__CRM__HUBSPOT_ACCESS_TOKEN",
            ));
        }
        if self.timeout_secs == 0 || self.timeout_secs > 120 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            hubspot_access_token: String::new(),
            hubspot_base_url: default_base_url(),
            pipeline: default_pipeline(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.hubapi.com".to_string()
}

fn default_pipeline() -> String {
    "default".to_string()
}

fn default_timeout() -> u64 {
    15
}
