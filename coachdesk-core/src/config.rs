//! Store and backend configuration.
//!
//! Configuration is loaded from environment variables with defaults suited
//! to local development, then checked with `validate()`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// MUTATION POLICY
// ============================================================================

/// What happens when a second mutation targets an id that already has one
/// in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationPolicy {
    /// Fail the second request with `DeskError::MutationInFlight`.
    Reject,
    /// Wait for the first mutation to settle, then run.
    #[default]
    Queue,
}

impl std::str::FromStr for MutationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "queue" => Ok(Self::Queue),
            other => Err(ConfigError::InvalidValue {
                field: "mutation_policy".to_string(),
                value: other.to_string(),
                reason: "expected 'reject' or 'queue'".to_string(),
            }),
        }
    }
}

// ============================================================================
// STORE CONFIGURATION
// ============================================================================

/// Behaviour of the entity stores.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Page size used by projections when a query does not name one.
    pub default_per_page: u32,

    /// Largest page size a search may request.
    pub max_per_page: u32,

    pub mutation_policy: MutationPolicy,

    /// Upper bound on the members loaded for one group.
    pub group_fetch_cap: usize,

    /// Where filter/sort preferences are persisted. `None` keeps them in memory.
    pub preferences_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_per_page: 20,
            max_per_page: 100,
            mutation_policy: MutationPolicy::Queue,
            group_fetch_cap: 500,
            preferences_path: None,
        }
    }
}

impl StoreConfig {
    /// Create StoreConfig from environment variables.
    ///
    /// Environment variables:
    /// - `COACHDESK_DEFAULT_PER_PAGE`: default page size (default: 20)
    /// - `COACHDESK_MAX_PER_PAGE`: page size ceiling (default: 100)
    /// - `COACHDESK_MUTATION_POLICY`: "queue" or "reject" (default: queue)
    /// - `COACHDESK_GROUP_FETCH_CAP`: members loaded per group (default: 500)
    /// - `COACHDESK_PREFERENCES_PATH`: preferences file (default: in memory)
    ///
    /// Unparseable values fall back to the default; call `validate()` to
    /// reject inconsistent combinations.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let default_per_page = std::env::var("COACHDESK_DEFAULT_PER_PAGE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.default_per_page);

        let max_per_page = std::env::var("COACHDESK_MAX_PER_PAGE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_per_page);

        let mutation_policy = std::env::var("COACHDESK_MUTATION_POLICY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.mutation_policy);

        let group_fetch_cap = std::env::var("COACHDESK_GROUP_FETCH_CAP")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.group_fetch_cap);

        let preferences_path = std::env::var("COACHDESK_PREFERENCES_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Self {
            default_per_page,
            max_per_page,
            mutation_policy,
            group_fetch_cap,
            preferences_path,
        }
    }

    pub fn with_mutation_policy(mut self, policy: MutationPolicy) -> Self {
        self.mutation_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_per_page == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_per_page".to_string(),
                value: self.max_per_page.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.default_per_page == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_per_page".to_string(),
                value: self.default_per_page.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.default_per_page > self.max_per_page {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("default_per_page={}", self.default_per_page),
                option_b: format!("max_per_page={}", self.max_per_page),
            });
        }
        if self.group_fetch_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "group_fetch_cap".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// BACKEND CONFIGURATION
// ============================================================================

/// Connection settings for the hosted REST backend.
#[derive(Clone, PartialEq)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://project.example.co`.
    pub base_url: String,

    /// Public api key sent with every request.
    pub api_key: String,

    /// Request timeout. `None` leaves the transport default in place.
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            timeout: None,
        }
    }
}

impl BackendConfig {
    /// Create BackendConfig from environment variables.
    ///
    /// Environment variables:
    /// - `COACHDESK_BACKEND_URL`: base URL (default: http://localhost:54321)
    /// - `COACHDESK_BACKEND_API_KEY`: api key (required)
    /// - `COACHDESK_BACKEND_TIMEOUT_MS`: request timeout in milliseconds (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("COACHDESK_BACKEND_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Self::default().base_url);

        let api_key = std::env::var("COACHDESK_BACKEND_API_KEY").map_err(|_| {
            ConfigError::MissingRequired {
                field: "COACHDESK_BACKEND_API_KEY".to_string(),
            }
        })?;

        let timeout = match std::env::var("COACHDESK_BACKEND_TIMEOUT_MS") {
            Ok(raw) => {
                let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    field: "COACHDESK_BACKEND_TIMEOUT_MS".to_string(),
                    value: raw.clone(),
                    reason: "must be a whole number of milliseconds".to_string(),
                })?;
                Some(Duration::from_millis(ms))
            }
            Err(_) => None,
        };

        let config = Self {
            base_url,
            api_key,
            timeout,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "base_url".to_string(),
                value: self.base_url.clone(),
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "api_key".to_string(),
            });
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidValue {
                field: "timeout".to_string(),
                value: "0".to_string(),
                reason: "must be positive when set".to_string(),
            });
        }
        Ok(())
    }

    /// REST endpoint for a table.
    pub fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url.trim_end_matches('/'), table)
    }
}
