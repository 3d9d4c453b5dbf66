//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all errors at once)
//!     → ServiceConfig (validated, immutable)
//!     → lifecycle/startup.rs wires subsystems from it
//! ```
//!
//! Policies are not part of this config; they have their own document and
//! reload path (see `policy::source`). watcher.rs is shared by both.

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, EventsConfig, HealthConfig, LogFormat, ObservabilityConfig, PolicySourceConfig,
    ServiceConfig, ShutdownConfig,
};
pub use validation::ValidationError;
