//! Admin API.
//!
//! Policy management, guard inspection and health, behind bearer-token
//! auth. Mounted by the host service on its own listener.

pub mod auth;
pub mod handlers;
pub mod watch;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};

use crate::events::EventBuilder;
use crate::health::HealthAggregator;
use crate::lifecycle::shutdown::Shutdown;
use crate::resilience::executor::ResilienceExecutor;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use self::watch::watch_policies;

/// Shared handler state.
#[derive(Clone)]
pub struct AdminState {
    pub executor: Arc<ResilienceExecutor>,
    pub health: Arc<HealthAggregator>,
    pub events: Option<Arc<EventBuilder>>,
    pub shutdown: Shutdown,
    pub service_name: Arc<str>,
    pub api_key: Arc<str>,
    pub started_at: DateTime<Utc>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/health", get(get_health))
        .route("/admin/policies", get(list_policies))
        .route("/admin/policies/validate", post(validate_policy))
        .route("/admin/policies/watch", get(watch_policies))
        .route(
            "/admin/policies/{name}",
            get(get_policy).put(put_policy).delete(delete_policy),
        )
        .route("/admin/circuits", get(list_circuits))
        .route("/admin/circuits/{name}/reset", post(reset_circuit))
        .route("/admin/bulkheads", get(list_bulkheads))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
