use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::events::{AuditOutcome, EmitExt, EventType, Metadata};
use crate::health::HealthReport;
use crate::health::HealthStatus;
use crate::http::response::ApiError;
use crate::policy::schema::Policy;
use crate::policy::validation::{violations, Violation};
use crate::resilience::bulkhead::BulkheadMetrics;
use crate::resilience::circuit_breaker::CircuitBreakerState;
use crate::resilience::error::ResilienceError;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub service_name: String,
    pub policies: usize,
    pub in_flight: usize,
    pub uptime_secs: i64,
}

#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Serialize)]
pub struct PartitionStatus {
    pub policy: String,
    #[serde(flatten)]
    pub metrics: BulkheadMetrics,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let drain = state.executor.drain_coordinator();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: if drain.is_draining() { "draining" } else { "operational" }.to_string(),
        service_name: state.service_name.to_string(),
        policies: state.executor.engine().len(),
        in_flight: drain.in_flight(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// 200 while healthy or degraded, 503 when unhealthy.
pub async fn get_health(State(state): State<AdminState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.health.check();
    let status = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(report))
}

pub async fn list_policies(State(state): State<AdminState>) -> Json<Vec<Policy>> {
    Json(state.executor.engine().list())
}

pub async fn get_policy(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<Policy>, ApiError> {
    state
        .executor
        .engine()
        .get_policy(&name)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("policy '{name}' not found")))
}

pub async fn put_policy(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    Json(mut policy): Json<Policy>,
) -> Result<Json<Policy>, ApiError> {
    if policy.name.is_empty() {
        policy.name = name.clone();
    } else if policy.name != name {
        return Err(ApiError::bad_request(format!(
            "body names policy '{}' but path names '{name}'",
            policy.name
        )));
    }

    let result = state.executor.engine().update_policy(policy);
    audit(&state, EventType::PolicyChange, "policy.update", &name, &result);
    Ok(Json(result?))
}

pub async fn delete_policy(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<Policy>, ApiError> {
    if state.executor.engine().get_policy(&name).is_none() {
        return Err(ApiError::not_found(format!("policy '{name}' not found")));
    }
    let result = state.executor.engine().delete_policy(&name);
    audit(&state, EventType::PolicyChange, "policy.delete", &name, &result);
    Ok(Json(result?))
}

pub async fn validate_policy(Json(policy): Json<Policy>) -> Json<ValidationReport> {
    let violations = violations(&policy);
    Json(ValidationReport {
        valid: violations.is_empty(),
        violations,
    })
}

pub async fn list_circuits(State(state): State<AdminState>) -> Json<Vec<CircuitBreakerState>> {
    Json(state.executor.circuit_states())
}

pub async fn reset_circuit(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<CircuitBreakerState>, ApiError> {
    if state.executor.engine().get_policy(&name).is_none() {
        return Err(ApiError::not_found(format!("policy '{name}' not found")));
    }
    let result = state.executor.reset_circuit(&name);
    audit(&state, EventType::CircuitStateChange, "circuit.reset", &name, &result);
    Ok(Json(result?))
}

pub async fn list_bulkheads(State(state): State<AdminState>) -> Json<Vec<PartitionStatus>> {
    Json(
        state
            .executor
            .bulkhead_metrics()
            .into_iter()
            .map(|(policy, metrics)| PartitionStatus { policy, metrics })
            .collect(),
    )
}

fn audit<T>(
    state: &AdminState,
    event_type: EventType,
    action: &str,
    resource: &str,
    result: &Result<T, ResilienceError>,
) {
    let Some(events) = &state.events else {
        return;
    };
    let (outcome, metadata) = match result {
        Ok(_) => (AuditOutcome::Success, Metadata::new()),
        Err(e) => (
            AuditOutcome::Failure,
            crate::metadata!("error_code" => e.code(), "error" => e.to_string()),
        ),
    };
    let mut event = events.build_audit(event_type, action, resource, outcome, metadata);
    event.actor = Some("admin-api".to_string());
    state.events.emit_audit(event);
}
