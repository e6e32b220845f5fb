//! Reconciliation sweeper configuration

use serde::Deserialize;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// UTC hour of the daily run
    #[serde(default)]
    pub run_hour_utc: u32,

    /// Processed webhook events older than this are pruned by the sweep
    #[serde(default = "default_retention")]
    pub event_retention_days: i64,
}

impl SweeperConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.run_hour_utc > 23 {
            return Err(ValidationError::InvalidRunHour);
        }
        if self.event_retention_days < 1 {
            return Err(ValidationError::InvalidRetention);
        }
        Ok(())
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            run_hour_utc: 0,
            event_retention_days: default_retention(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_retention() -> i64 {
    90
}
