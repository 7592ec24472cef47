//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TollgateError};

/// Prefix for environment variable overrides, e.g. `TOLLGATE__RATE_LIMIT__REQUESTS=10`.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
///
/// `requests` tokens are granted per `duration_minutes`, refilled continuously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Bucket capacity, and the number of tokens restored per period
    #[serde(default = "default_requests")]
    pub requests: u64,

    /// Refill period in minutes
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: u64,

    /// Request path prefixes subject to rate limiting
    #[serde(default = "default_protected_prefixes")]
    pub protected_prefixes: Vec<String>,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP` when present
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            duration_minutes: default_duration_minutes(),
            protected_prefixes: default_protected_prefixes(),
            trust_forwarded_headers: false,
        }
    }
}

fn default_requests() -> u64 {
    100
}

fn default_duration_minutes() -> u64 {
    1
}

fn default_protected_prefixes() -> Vec<String> {
    vec!["/products".to_string()]
}

impl RateLimitSettings {
    /// Check that the settings describe a usable policy.
    pub fn validate(&self) -> Result<()> {
        if self.requests == 0 {
            return Err(TollgateError::Config(
                "rate_limit.requests must be greater than zero".to_string(),
            ));
        }
        if self.duration_minutes == 0 {
            return Err(TollgateError::Config(
                "rate_limit.duration_minutes must be greater than zero".to_string(),
            ));
        }
        if self.protected_prefixes.is_empty() {
            return Err(TollgateError::Config(
                "rate_limit.protected_prefixes must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl TollgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, overlaid with `TOLLGATE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }

        let config: TollgateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate()
    }
}
