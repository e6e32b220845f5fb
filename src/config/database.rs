//! Ledger database settings.
//!
//! ```text
//! COPYDESK__DATABASE__URL=postgresql://copydesk:secret@db:5432/copydesk
//! COPYDESK__DATABASE__POOL__MAX_CONNECTIONS=10
//! COPYDESK__DATABASE__RUN_MIGRATIONS=false
//! ```

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

const POOL_CEILING: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// postgres:// or postgresql:// URL of the ledger database
    pub url: String,

    #[serde(default)]
    pub pool: PoolConfig,

    /// Apply `migrations/` before serving
    #[serde(default = "run_migrations_by_default")]
    pub run_migrations: bool,
}

/// Connection pool sizing and lifetimes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.min_connections > self.max_connections {
            return Err(ValidationError::InvalidPoolSize);
        }
        if self.max_connections > POOL_CEILING {
            return Err(ValidationError::PoolSizeTooLarge);
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// The URL with the password masked, safe to log.
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        match rest.split_once('@') {
            Some((credentials, host)) => {
                let user = credentials.split(':').next().unwrap_or_default();
                format!("{}://{}:***@{}", scheme, user, host)
            }
            None => self.url.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.is_empty() {
            return Err(ValidationError::MissingRequired("COPYDESK__DATABASE__URL"));
        }
        let scheme = self.url.split_once("://").map(|(scheme, _)| scheme);
        if !matches!(scheme, Some("postgres" | "postgresql")) {
            return Err(ValidationError::InvalidDatabaseUrl);
        }
        self.pool.validate()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool: PoolConfig::default(),
            run_migrations: run_migrations_by_default(),
        }
    }
}

fn run_migrations_by_default() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_url(url: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_run_migrations_with_a_small_pool() {
        let config = DatabaseConfig::default();

        assert!(config.run_migrations);
        assert_eq!(config.pool.min_connections, 2);
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.pool.acquire_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn url_is_required() {
        assert_eq!(
            DatabaseConfig::default().validate(),
            Err(ValidationError::MissingRequired("COPYDESK__DATABASE__URL"))
        );
    }

    #[test]
    fn only_postgres_schemes_are_accepted() {
        assert!(with_url("postgres://localhost/copydesk").validate().is_ok());
        assert!(with_url("postgresql://localhost/copydesk").validate().is_ok());
        assert_eq!(
            with_url("mysql://localhost/copydesk").validate(),
            Err(ValidationError::InvalidDatabaseUrl)
        );
        assert_eq!(
            with_url("localhost/copydesk").validate(),
            Err(ValidationError::InvalidDatabaseUrl)
        );
    }

    #[test]
    fn pool_bounds_are_checked() {
        let mut config = with_url("postgresql://localhost/copydesk");

        config.pool.min_connections = 12;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPoolSize));

        config.pool.min_connections = 2;
        config.pool.max_connections = 150;
        assert_eq!(config.validate(), Err(ValidationError::PoolSizeTooLarge));
    }

    #[test]
    fn redacted_url_masks_only_the_password() {
        assert_eq!(
            with_url("postgresql://copydesk:s3cret@db:5432/copydesk").redacted_url(),
            "postgresql://copydesk:***@db:5432/copydesk"
        );
        assert_eq!(
            with_url("postgresql://localhost/copydesk").redacted_url(),
            "postgresql://localhost/copydesk"
        );
    }
}
