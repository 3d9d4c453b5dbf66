//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::net::TcpListener;

use resilience_engine::admin::{setup_admin_router, AdminState};
use resilience_engine::config::AdminConfig;
use resilience_engine::events::{EventBuilder, MemorySink};
use resilience_engine::health::{BulkheadHealth, CircuitBreakerHealth, HealthAggregator};
use resilience_engine::http::HttpServer;
use resilience_engine::policy::schema::RetryConfig;
use resilience_engine::{Policy, PolicyEngine, ResilienceExecutor, Shutdown};

pub const API_KEY: &str = "test-admin-key";

/// A fresh directory under the system temp dir.
pub fn temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Retry settings with no jitter and short delays.
pub fn fast_retry(max_attempts: i32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay_ms: 5,
        max_delay_ms: 20,
        jitter_percent: 0.0,
        ..RetryConfig::default()
    }
}

/// Executor over a store seeded with `policies`, emitting into a memory sink.
pub fn executor_with(policies: Vec<Policy>) -> (Arc<ResilienceExecutor>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::default());
    let events = Some(Arc::new(
        EventBuilder::new("test-service")
            .with_request_correlation()
            .with_sink(sink.clone()),
    ));
    let engine = Arc::new(PolicyEngine::new().with_events(events.clone()));
    engine.apply_all(policies).unwrap();
    let executor = Arc::new(ResilienceExecutor::new(engine).with_events(events));
    (executor, sink)
}

pub struct AdminHarness {
    pub addr: SocketAddr,
    pub executor: Arc<ResilienceExecutor>,
    pub sink: Arc<MemorySink>,
    pub shutdown: Shutdown,
}

impl AdminHarness {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }
}

/// Serve the admin API on an ephemeral port.
pub async fn spawn_admin(policies: Vec<Policy>) -> AdminHarness {
    let (executor, sink) = executor_with(policies);
    let events = Some(Arc::new(
        EventBuilder::new("test-service").with_sink(sink.clone()),
    ));
    let health = Arc::new(
        HealthAggregator::new()
            .with_checker(Arc::new(CircuitBreakerHealth::new(executor.clone())))
            .with_checker(Arc::new(BulkheadHealth::new(executor.clone()))),
    );
    let shutdown = Shutdown::new();
    let state = AdminState {
        executor: executor.clone(),
        health,
        events,
        shutdown: shutdown.clone(),
        service_name: Arc::from("test-service"),
        api_key: Arc::from(API_KEY),
        started_at: Utc::now(),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(setup_admin_router(state), &AdminConfig::default());
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    AdminHarness {
        addr,
        executor,
        sink,
        shutdown,
    }
}
