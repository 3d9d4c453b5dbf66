//! Configuration validation.
//!
//! Serde handles syntax; this checks values. All problems are returned at
//! once so an operator can fix a config in one pass.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ServiceConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service_name.trim().is_empty() {
        errors.push(ValidationError::new("service_name", "must not be empty"));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
        if config.admin.request_timeout_ms == 0 {
            errors.push(ValidationError::new("admin.request_timeout_ms", "must be positive"));
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if config.policies.watch && config.policies.path.is_none() {
        errors.push(ValidationError::new("policies.watch", "requires policies.path"));
    }

    if config.shutdown.drain_timeout_ms == 0 {
        errors.push(ValidationError::new("shutdown.drain_timeout_ms", "must be positive"));
    }
    if config.health.interval_ms == 0 {
        errors.push(ValidationError::new("health.interval_ms", "must be positive"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
