//! Resilience Policy Engine Library

pub mod admin;
pub mod config;
pub mod events;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod policy;
pub mod resilience;

pub use config::schema::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::{Services, Shutdown};
pub use policy::{Policy, PolicyEngine};
pub use resilience::{ExecutionContext, ResilienceError, ResilienceExecutor};
