//! Resilience policy service.
//!
//! Hosts the policy store and the resilience executor, and exposes the
//! admin API for managing them at runtime.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌────────────────────────────────────────────────────┐
//!                 │                RESILIENCE SERVICE                  │
//!                 │                                                    │
//!  policy file ───┼─▶ PolicyFileSource ──┐                             │
//!                 │                      ▼                             │
//!  admin API  ────┼─▶ handlers ───▶ PolicyEngine ──watch──▶ WebSocket  │
//!                 │                      │                             │
//!                 │                      ▼                             │
//!  callers    ────┼─▶ ResilienceExecutor                               │
//!                 │     drain → rate limit → bulkhead → deadline       │
//!                 │     → retry → circuit breaker → attempt timeout    │
//!                 │                                                    │
//!                 │  ┌──────────────────────────────────────────────┐  │
//!                 │  │ events · metrics · health · lifecycle        │  │
//!                 │  └──────────────────────────────────────────────┘  │
//!                 └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use resilience_engine::admin::setup_admin_router;
use resilience_engine::config::{load_config, ServiceConfig};
use resilience_engine::http::HttpServer;
use resilience_engine::lifecycle::{signals, Services};
use resilience_engine::observability::{logging::init_logging, metrics::init_metrics};

#[derive(Parser)]
#[command(name = "resilience-service")]
#[command(about = "Resilience policy engine service", long_about = None)]
struct Args {
    /// Service configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Policy file, overriding the one named in the configuration.
    #[arg(short, long)]
    policies: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(policies) = args.policies {
        config.policies.path = Some(policies);
    }

    init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        service_name = %config.service_name,
        "resilience-service starting"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let services = Services::build(config)?;
    let shutdown = services.shutdown.clone();

    let health = tokio::spawn(
        services
            .health
            .clone()
            .run(services.config.health.interval(), shutdown.subscribe()),
    );

    let server = if services.config.admin.enabled {
        let listener = TcpListener::bind(&services.config.admin.bind_address).await?;
        let router = setup_admin_router(services.admin_state());
        let server = HttpServer::new(router, &services.config.admin);
        let server_shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(listener, server_shutdown).await {
                tracing::error!(error = %e, "Admin server failed");
            }
        }))
    } else {
        tracing::info!("Admin API disabled");
        None
    };

    let mut stop = shutdown.subscribe();
    signals::spawn_signal_handler(shutdown.clone());
    let _ = stop.recv().await;
    tracing::info!("Shutdown signal received, draining");

    let drain_timeout = services.config.shutdown.drain_timeout();
    match services.drain.drain(drain_timeout).await {
        Ok(()) => tracing::info!("All in-flight work drained"),
        Err(e) => tracing::warn!(error = %e, "Drain timed out"),
    }

    if let Some(server) = server {
        let _ = server.await;
    }
    let _ = health.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
