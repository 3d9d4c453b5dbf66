//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → events → policy store → executor → health
//!     → policy file (load, optionally watch)
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Shutdown broadcast → admin server stops accepting
//!     → DrainCoordinator stops admitting executions
//!     → wait for in-flight work up to the drain timeout → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! In-flight work is never killed. Work still running when the drain
//! timeout passes is reported as undrained.

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{DrainCoordinator, InFlightGuard, Shutdown};
pub use startup::Services;
