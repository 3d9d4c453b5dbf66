//! Policy definitions and their store.
//!
//! # Data Flow
//! ```text
//! policy file (JSON/TOML) or admin API
//!     → codec.rs (decode)
//!     → validation.rs (field rules)
//!     → engine.rs (version, copy-on-write swap, change event)
//!     → executor picks up the new version on its next call
//!
//! source.rs watches the file and re-applies it on change; a document
//! that fails validation leaves the current policies in force.
//! ```

pub mod codec;
pub mod engine;
pub mod schema;
pub mod source;
pub mod validation;

pub use codec::{
    marshal_document, marshal_policy, unmarshal_document, unmarshal_policy, CodecError,
    PolicyFormat,
};
pub use engine::{PolicyEngine, PolicyEvent, PolicyEventType, PolicyWatch};
pub use schema::{
    BulkheadConfig, CircuitBreakerConfig, Policy, PolicyDocument, RateLimitConfig, RetryConfig,
    TimeoutConfig,
};
pub use source::{validate_policy_path, PolicyFileSource, SourceError};
pub use validation::{validate_policy, violations, Violation};
