//! Policy serialization.
//!
//! JSON and TOML carry the same structure; durations are integer
//! milliseconds and absent sections are omitted, so a policy survives any
//! marshal/unmarshal cycle unchanged.

use std::path::Path;

use thiserror::Error;

use crate::policy::schema::{Policy, PolicyDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyFormat {
    Json,
    Toml,
}

impl PolicyFormat {
    /// Pick a format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(PolicyFormat::Json),
            "toml" => Some(PolicyFormat::Toml),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            PolicyFormat::Json => "application/json",
            PolicyFormat::Toml => "application/toml",
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("unsupported policy format for '{0}'")]
    UnsupportedFormat(String),
}

pub fn marshal_policy(policy: &Policy, format: PolicyFormat) -> Result<String, CodecError> {
    Ok(match format {
        PolicyFormat::Json => serde_json::to_string_pretty(policy)?,
        PolicyFormat::Toml => toml::to_string(policy)?,
    })
}

pub fn unmarshal_policy(input: &str, format: PolicyFormat) -> Result<Policy, CodecError> {
    Ok(match format {
        PolicyFormat::Json => serde_json::from_str(input)?,
        PolicyFormat::Toml => toml::from_str(input)?,
    })
}

pub fn marshal_document(doc: &PolicyDocument, format: PolicyFormat) -> Result<String, CodecError> {
    Ok(match format {
        PolicyFormat::Json => serde_json::to_string_pretty(doc)?,
        PolicyFormat::Toml => toml::to_string(doc)?,
    })
}

pub fn unmarshal_document(input: &str, format: PolicyFormat) -> Result<PolicyDocument, CodecError> {
    Ok(match format {
        PolicyFormat::Json => serde_json::from_str(input)?,
        PolicyFormat::Toml => toml::from_str(input)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::schema::{
        BulkheadConfig, CircuitBreakerConfig, RateLimitConfig, RetryConfig, TimeoutConfig,
    };
    use crate::policy::validation::{
        validate_policy, MAX_DURATION_MS, MAX_TIMEOUT_MS, MAX_VERSION, MIN_TIMEOUT_MS,
    };
    use proptest::prelude::*;

    fn full_policy() -> Policy {
        Policy {
            name: "payments".into(),
            version: 4,
            service_pattern: Some("pay-*".into()),
            circuit_breaker: Some(CircuitBreakerConfig::default()),
            retry: Some(RetryConfig {
                retryable_errors: vec!["TIMEOUT".into(), "SERVICE_UNAVAILABLE".into()],
                ..RetryConfig::default()
            }),
            rate_limit: Some(RateLimitConfig::default()),
            bulkhead: Some(BulkheadConfig::default()),
            timeout: Some(TimeoutConfig::default()),
        }
    }

    #[test]
    fn test_formats_agree() {
        let policy = full_policy();
        for format in [PolicyFormat::Json, PolicyFormat::Toml] {
            let text = marshal_policy(&policy, format).unwrap();
            let back = unmarshal_policy(&text, format).unwrap();
            assert_eq!(back, policy, "{format:?}");
            assert_eq!(marshal_policy(&back, format).unwrap(), text);
        }
    }

    #[test]
    fn test_absent_sections_are_omitted() {
        let json = marshal_policy(&Policy::new("bare"), PolicyFormat::Json).unwrap();
        assert!(!json.contains("circuit_breaker"));
        assert!(!json.contains("service_pattern"));
    }

    #[test]
    fn test_toml_document() {
        let input = r#"
            [[policies]]
            name = "users"

            [policies.circuit_breaker]
            failure_threshold = 3
            timeout_ms = 1000

            [[policies]]
            name = "uploads"

            [policies.bulkhead]
            max_concurrent = 4
        "#;
        let doc = unmarshal_document(input, PolicyFormat::Toml).unwrap();
        assert_eq!(doc.policies.len(), 2);
        let cb = doc.policies[0].circuit_breaker.as_ref().unwrap();
        assert_eq!(cb.failure_threshold, 3);
        // Unspecified fields take defaults.
        assert_eq!(cb.success_threshold, 2);
        assert_eq!(doc.policies[1].bulkhead.as_ref().unwrap().max_queue, 100);

        let json = marshal_document(&doc, PolicyFormat::Json).unwrap();
        assert_eq!(unmarshal_document(&json, PolicyFormat::Json).unwrap(), doc);
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            PolicyFormat::from_path(Path::new("/etc/policies.JSON")),
            Some(PolicyFormat::Json)
        );
        assert_eq!(
            PolicyFormat::from_path(Path::new("policies.toml")),
            Some(PolicyFormat::Toml)
        );
        assert_eq!(PolicyFormat::from_path(Path::new("policies.yaml")), None);
        assert_eq!(PolicyFormat::from_path(Path::new("policies")), None);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            unmarshal_policy("{not json", PolicyFormat::Json),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(
            unmarshal_policy("name = ", PolicyFormat::Toml),
            Err(CodecError::TomlParse(_))
        ));
    }

    #[test]
    fn test_largest_valid_values_encode_as_toml() {
        let policy = Policy {
            version: MAX_VERSION,
            ..Policy::new("edge")
                .with_bulkhead(BulkheadConfig {
                    queue_timeout_ms: MAX_DURATION_MS,
                    ..BulkheadConfig::default()
                })
                .with_timeout(TimeoutConfig {
                    default_ms: MAX_TIMEOUT_MS,
                    max_ms: Some(MAX_DURATION_MS),
                })
        };
        assert!(validate_policy(&policy).is_ok());

        let text = marshal_policy(&policy, PolicyFormat::Toml).unwrap();
        assert_eq!(unmarshal_policy(&text, PolicyFormat::Toml).unwrap(), policy);
    }

    fn arb_policy() -> impl Strategy<Value = Policy> {
        let cb = (1i32..50, 1i32..50, 1u64..=MAX_DURATION_MS, 1i32..5).prop_map(|(f, s, t, p)| {
            CircuitBreakerConfig {
                failure_threshold: f,
                success_threshold: s,
                timeout_ms: t,
                probe_count: p,
            }
        });
        let delay = 1u64..=MAX_DURATION_MS;
        let retry = (1i32..10, delay.clone(), delay, 0u32..24, 0u32..=16).prop_map(
            |(attempts, a, b, m, j)| RetryConfig {
                max_attempts: attempts,
                base_delay_ms: a.min(b),
                max_delay_ms: a.max(b),
                multiplier: 1.0 + f64::from(m) / 8.0,
                jitter_percent: f64::from(j) / 16.0,
                retryable_errors: Vec::new(),
            },
        );
        let rate = (any::<bool>(), 1i32..10_000, 1u64..=MAX_DURATION_MS, 0i32..1_000).prop_map(
            |(bucket, limit, window, burst)| RateLimitConfig {
                algorithm: if bucket { "token_bucket" } else { "sliding_window" }.into(),
                limit,
                window_ms: window,
                burst_size: burst,
            },
        );
        let bulkhead = (1i32..100, 0i32..1_000, 1u64..=MAX_DURATION_MS).prop_map(|(c, q, t)| {
            BulkheadConfig {
                max_concurrent: c,
                max_queue: q,
                queue_timeout_ms: t,
            }
        });
        let timeout = (
            MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS,
            proptest::option::of(0u64..=MAX_DURATION_MS),
        )
            .prop_map(|(default_ms, max)| TimeoutConfig {
                default_ms,
                max_ms: max.map(|m| m.max(default_ms)),
            });

        (
            "[a-z][a-z0-9-]{0,15}",
            0u64..=MAX_VERSION,
            proptest::option::of("[a-z-]{1,8}\\*?"),
            proptest::option::of(cb),
            proptest::option::of(retry),
            proptest::option::of(rate),
            proptest::option::of(bulkhead),
            proptest::option::of(timeout),
        )
            .prop_map(
                |(name, version, service_pattern, cb, retry, rate, bulkhead, timeout)| Policy {
                    name,
                    version,
                    service_pattern,
                    circuit_breaker: cb,
                    retry,
                    rate_limit: rate,
                    bulkhead,
                    timeout,
                },
            )
    }

    proptest! {
        #[test]
        fn prop_round_trip(policy in arb_policy()) {
            prop_assert!(validate_policy(&policy).is_ok());
            for format in [PolicyFormat::Json, PolicyFormat::Toml] {
                let text = marshal_policy(&policy, format).unwrap();
                let back = unmarshal_policy(&text, format).unwrap();
                prop_assert_eq!(&back, &policy);
                prop_assert_eq!(marshal_policy(&back, format).unwrap(), text);
            }
        }
    }
}
