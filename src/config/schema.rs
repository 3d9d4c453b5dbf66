//! Configuration schema definitions.
//!
//! This module defines the configuration of the resilience service host.
//! Every section has defaults, so an empty file is a valid config.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the resilience service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name stamped on every emitted event.
    pub service_name: String,

    pub admin: AdminConfig,

    pub observability: ObservabilityConfig,

    /// Where policy definitions come from.
    pub policies: PolicySourceConfig,

    pub shutdown: ShutdownConfig,

    pub events: EventsConfig,

    pub health: HealthConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "resilience-service".to_string(),
            admin: AdminConfig::default(),
            observability: ObservabilityConfig::default(),
            policies: PolicySourceConfig::default(),
            shutdown: ShutdownConfig::default(),
            events: EventsConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve the admin API.
    pub enabled: bool,

    /// Admin API bind address.
    pub bind_address: String,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:8081".to_string(),
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            request_timeout_ms: 10_000,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl AdminConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Log output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` string). `RUST_LOG` overrides it.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Policy file location.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicySourceConfig {
    /// Policy document (`.json` or `.toml`). No file means an empty store.
    pub path: Option<PathBuf>,

    /// Directory the policy file must live in. Defaults to the file's own
    /// directory.
    pub base_dir: Option<PathBuf>,

    /// Re-apply the file when it changes.
    pub watch: bool,
}

/// Graceful shutdown settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for in-flight work before giving up.
    pub drain_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 30_000,
        }
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Event emission settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Log resilience and audit events.
    pub enabled: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Background health monitor settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Check interval in milliseconds.
    pub interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { interval_ms: 10_000 }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.service_name, "resilience-service");
        assert_eq!(config.shutdown.drain_timeout(), Duration::from_secs(30));
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
        assert!(config.policies.path.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config: ServiceConfig = toml::from_str(
            r#"
            service_name = "auth-edge"

            [observability]
            log_format = "json"

            [policies]
            path = "/etc/resilience/policies.toml"
            watch = true
            "#,
        )
        .unwrap();
        assert_eq!(config.service_name, "auth-edge");
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.observability.log_level, "info");
        assert!(config.policies.watch);
        assert_eq!(config.admin.bind_address, "127.0.0.1:8081");
    }
}
