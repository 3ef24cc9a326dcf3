//! Tracing subscriber setup.
//!
//! Stores log through `tracing` with structured fields; this module installs
//! the subscriber that renders them. Call [`init_tracing`] once at startup.

use coachdesk_core::{DeskError, DeskResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directives used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "coachdesk_store=debug,info";

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Filter directives applied when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json: false,
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Reads `COACHDESK_LOG_FORMAT` ("json" or "pretty", default pretty).
    pub fn from_env() -> Self {
        let json = std::env::var("COACHDESK_LOG_FORMAT")
            .map(|s| s.trim().eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        Self {
            json,
            ..Self::default()
        }
    }
}

/// Install the global tracing subscriber.
///
/// # Errors
/// Fails when a global subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> DeskResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| DeskError::unknown(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(json = config.json, "Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_log_format_from_env() {
        {
            let _guard = EnvVarGuard::set("COACHDESK_LOG_FORMAT", Some("JSON"));
            assert!(TelemetryConfig::from_env().json);
        }
        let _guard = EnvVarGuard::set("COACHDESK_LOG_FORMAT", None);
        let config = TelemetryConfig::from_env();
        assert!(!config.json);
        assert_eq!(config.default_filter, DEFAULT_FILTER);
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig::default();
        // The first call may lose to another test; the second always finds
        // a subscriber installed.
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
