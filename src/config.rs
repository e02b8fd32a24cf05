//! Routing configuration
//!
//! A [`RoutingConfig`] names the master database, any number of replicas, and
//! whether replica routing is switched off altogether. It can be built in code,
//! read from the environment, or (with the `serde` feature) parsed from JSON.
//!
//! # Example
//!
//! ```
//! use diesel_replica::RoutingConfig;
//!
//! let config = RoutingConfig::builder()
//!     .master_url("postgres://localhost/app")
//!     .replica_url("postgres://replica-1/app")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.replica_urls().len(), 1);
//! assert!(!config.disabled());
//! ```

use crate::error::RoutingError;

/// Environment variable holding the master URL
pub const MASTER_URL_ENV: &str = "DATABASE_URL";

/// Environment variable holding comma-separated replica URLs
pub const REPLICA_URLS_ENV: &str = "DATABASE_REPLICA_URLS";

/// Environment variable that switches replica routing off
pub const REPLICA_DISABLED_ENV: &str = "DATABASE_REPLICA_DISABLED";

/// Connection targets and the routing kill switch
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoutingConfig {
    /// URL of the master database
    master_url: String,
    /// URLs of the replicas, used round-robin
    #[cfg_attr(feature = "serde", serde(default))]
    replica_urls: Vec<String>,
    /// When set, replica tags are ignored and every query uses the master
    #[cfg_attr(feature = "serde", serde(default))]
    disabled: bool,
}

impl RoutingConfig {
    /// Create a configuration with only a master
    pub fn new(master_url: impl Into<String>) -> Self {
        Self {
            master_url: master_url.into(),
            replica_urls: Vec::new(),
            disabled: false,
        }
    }

    /// Create a builder for configuring routing
    pub fn builder() -> RoutingConfigBuilder {
        RoutingConfigBuilder::default()
    }

    /// Add a replica URL
    pub fn with_replica(mut self, url: impl Into<String>) -> Self {
        self.replica_urls.push(url.into());
        self
    }

    /// Switch replica routing off or on
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Read the configuration from the process environment
    ///
    /// `DATABASE_URL` is required. `DATABASE_REPLICA_URLS` is a
    /// comma-separated list and may be absent. `DATABASE_REPLICA_DISABLED`
    /// accepts `1`, `true`, `yes` (and their negatives).
    pub fn from_env() -> Result<Self, RoutingError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RoutingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let master_url = lookup(MASTER_URL_ENV)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| RoutingError::MissingConfig(MASTER_URL_ENV.to_string()))?;

        let replica_urls = lookup(REPLICA_URLS_ENV)
            .map(|urls| {
                urls.split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let disabled = match lookup(REPLICA_DISABLED_ENV) {
            Some(value) => parse_flag(&value)?,
            None => false,
        };

        Ok(Self {
            master_url: master_url.trim().to_string(),
            replica_urls,
            disabled,
        })
    }

    /// Parse the configuration from a JSON document
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, RoutingError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RoutingError::InvalidConfig(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the master URL is present
    pub fn validate(&self) -> Result<(), RoutingError> {
        if self.master_url.trim().is_empty() {
            return Err(RoutingError::InvalidConfig(
                "master_url cannot be empty".to_string(),
            ));
        }
        if self.replica_urls.iter().any(|url| url.trim().is_empty()) {
            return Err(RoutingError::InvalidConfig(
                "replica urls cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the master URL
    pub fn master_url(&self) -> &str {
        &self.master_url
    }

    /// Get the replica URLs
    pub fn replica_urls(&self) -> &[String] {
        &self.replica_urls
    }

    /// Check if any replica is configured
    pub fn has_replicas(&self) -> bool {
        !self.replica_urls.is_empty()
    }

    /// Check if replica routing is switched off
    pub fn disabled(&self) -> bool {
        self.disabled
    }
}

fn parse_flag(value: &str) -> Result<bool, RoutingError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(RoutingError::InvalidConfig(format!(
            "{} must be a boolean, got `{}`",
            REPLICA_DISABLED_ENV, other
        ))),
    }
}

/// Builder for RoutingConfig
#[derive(Debug, Default)]
pub struct RoutingConfigBuilder {
    master_url: Option<String>,
    replica_urls: Vec<String>,
    disabled: Option<bool>,
}

impl RoutingConfigBuilder {
    /// Set the master URL
    pub fn master_url(mut self, url: impl Into<String>) -> Self {
        self.master_url = Some(url.into());
        self
    }

    /// Add a replica URL
    pub fn replica_url(mut self, url: impl Into<String>) -> Self {
        self.replica_urls.push(url.into());
        self
    }

    /// Add several replica URLs
    pub fn replica_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replica_urls.extend(urls.into_iter().map(Into::into));
        self
    }

    /// Switch replica routing off or on
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<RoutingConfig, RoutingError> {
        let config = RoutingConfig {
            master_url: self
                .master_url
                .ok_or_else(|| RoutingError::MissingConfig("master_url".to_string()))?,
            replica_urls: self.replica_urls,
            disabled: self.disabled.unwrap_or(false),
        };
        config.validate()?;
        Ok(config)
    }
}
