// health-monitor-rs/src/api.rs
// HTTP surface for probes, dashboards and manual control.
//
// Health endpoints always answer with a JSON body; probe failures show up as
// status data, never as a 500.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use config_rs::Settings;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agents::AgentMonitor;
use crate::aggregator::HealthAggregator;
use crate::alerts::AlertManager;
use crate::automation::AutomationService;
use crate::orchestrator::{StartupOrchestrator, StartupReport};
use crate::registry::ServiceRegistry;
use crate::status::HealthStatus;
use crate::tracker::ServiceStatus;

/// Shared application state, injected into every handler
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub started_at: Instant,
    pub registry: Arc<ServiceRegistry>,
    pub orchestrator: Arc<StartupOrchestrator>,
    pub aggregator: Arc<HealthAggregator>,
    pub alerts: Arc<AlertManager>,
    pub automation: Arc<AutomationService>,
    pub agents: Arc<AgentMonitor>,
    /// Filled in once the startup sequence has finished
    pub startup: Arc<RwLock<Option<StartupReport>>>,
}

impl AppState {
    fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

fn error_response(code: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        code,
        Json(ErrorResponse {
            error: error.into(),
            code: code.as_u16(),
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service_name: String,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub missing_configuration: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OrchestrationBlock {
    pub startup_complete: bool,
    pub ready: bool,
    pub order: Vec<String>,
    pub services: Vec<ServiceStatus>,
    pub startup: Option<StartupReport>,
}

#[derive(Debug, Serialize)]
pub struct ServiceEndpoint {
    pub name: String,
    pub required: bool,
    pub healthy: bool,
    pub state: String,
    pub response_time_ms: Option<f64>,
    pub avg_response_time_ms: Option<f64>,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServicesResponse {
    pub status: &'static str,
    pub healthy: usize,
    pub total: usize,
    pub services: Vec<ServiceEndpoint>,
    pub timestamp: DateTime<Utc>,
}

/// Buckets a service population by the fraction that is up.
pub fn services_bucket(healthy: usize, total: usize) -> &'static str {
    if total == 0 || healthy == total {
        return "healthy";
    }
    let fraction = healthy as f64 / total as f64;
    if fraction >= 0.5 {
        "degraded"
    } else if healthy > 0 {
        "unhealthy"
    } else {
        "critical"
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
        .route("/health/readiness", get(readiness))
        .route("/health/liveness", get(liveness))
        .route("/health/services", get(services))
        .route("/health/services/:name/restart", post(restart_service))
        .route("/health/automation", get(automation_status))
        .route("/health/automation/run", post(automation_run))
        .route("/health/automation/enable", post(automation_enable))
        .route("/health/automation/disable", post(automation_disable))
        .route("/health/agents", get(agents))
        .route("/health/agents/recover/:name", post(recover_agent))
        .route("/health/agents/heartbeat/:name", post(agent_heartbeat))
        .route("/health/agents/tasks/:name", post(agent_task))
        .route("/health/agents/performance", get(agents_performance))
        .route("/health/alerts", get(alerts))
        .route("/health/alerts/:id/resolve", post(resolve_alert))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let missing = state.settings.missing_required_env();
    let status = if missing.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    Json(HealthResponse {
        status,
        service_name: state.settings.server.service_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        missing_configuration: missing,
        timestamp: Utc::now(),
    })
}

async fn orchestration_block(state: &AppState) -> OrchestrationBlock {
    let startup = state.startup.read().await.clone();
    let services = state.registry.tracker().snapshot().await;
    let order = match &startup {
        Some(report) => report.order.clone(),
        None => crate::resolver::resolve_order(&state.registry).unwrap_or_default(),
    };

    OrchestrationBlock {
        startup_complete: startup.is_some(),
        ready: startup.as_ref().map_or(false, StartupReport::is_ready),
        order,
        services,
        startup,
    }
}

async fn health_detailed(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.aggregator.get_overall_health().await;
    let orchestration = orchestration_block(&state).await;
    let window = Duration::from_secs(state.settings.alerts.summary_window_hours * 3600);
    let alerts = state.alerts.get_alert_summary(window).await;

    let code = if health.status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(serde_json::json!({
            "status": health.status,
            "service_name": state.settings.server.service_name,
            "uptime_seconds": state.uptime_seconds(),
            "components": health.components,
            "orchestration": orchestration,
            "alerts": alerts,
            "timestamp": health.timestamp,
        })),
    )
}

async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let missing = state.settings.missing_required_env();
    let configured = missing.is_empty();

    // Deployments without a database component are gated on services only.
    let database = match state.aggregator.get_component_health("database").await {
        Some(component) => component.status.is_healthy(),
        None => true,
    };

    let startup_complete = state.startup.read().await.is_some();
    let failed_required: Vec<String> = state
        .registry
        .tracker()
        .snapshot()
        .await
        .into_iter()
        .filter(|s| s.required && s.state == crate::tracker::ServiceState::Failed)
        .map(|s| s.name)
        .collect();

    let ready = configured && database && startup_complete && failed_required.is_empty();
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(serde_json::json!({
            "ready": ready,
            "checks": {
                "configuration": configured,
                "database": database,
                "startup_complete": startup_complete,
                "required_services": failed_required.is_empty(),
            },
            "missing_configuration": missing,
            "failed_services": failed_required,
            "timestamp": Utc::now(),
        })),
    )
}

async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "alive",
        "uptime_seconds": state.uptime_seconds(),
        "timestamp": Utc::now(),
    }))
}

async fn services(State(state): State<AppState>) -> Json<ServicesResponse> {
    let services: Vec<ServiceEndpoint> = state
        .registry
        .tracker()
        .snapshot()
        .await
        .into_iter()
        .map(|s| ServiceEndpoint {
            healthy: s.state.is_ready(),
            state: s.state.to_string(),
            response_time_ms: s.last_response_time_ms,
            avg_response_time_ms: s.avg_response_time_ms,
            consecutive_failures: s.consecutive_failures,
            last_check: s.last_health_check,
            last_error: s.last_error,
            required: s.required,
            name: s.name,
        })
        .collect();

    let healthy = services.iter().filter(|s| s.healthy).count();
    let total = services.len();

    Json(ServicesResponse {
        status: services_bucket(healthy, total),
        healthy,
        total,
        services,
        timestamp: Utc::now(),
    })
}

async fn restart_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if !state.registry.contains(&name) {
        return error_response(StatusCode::NOT_FOUND, format!("unknown service '{}'", name))
            .into_response();
    }

    info!(service = %name, "Manual restart requested");
    match state.orchestrator.restart(&name).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn automation_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.automation.status().await)
}

async fn automation_run(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.automation.run_manual_check().await)
}

async fn automation_enable(State(state): State<AppState>) -> impl IntoResponse {
    state.automation.enable();
    Json(serde_json::json!({ "enabled": true }))
}

async fn automation_disable(State(state): State<AppState>) -> impl IntoResponse {
    state.automation.disable();
    Json(serde_json::json!({ "enabled": false }))
}

async fn agents(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": state.agents.overall().await,
        "agents": state.agents.statuses().await,
        "timestamp": Utc::now(),
    }))
}

async fn recover_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.agents.recover(&name).await {
        Some(status) => Json(status).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("unknown agent '{}'", name))
            .into_response(),
    }
}

async fn agent_heartbeat(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if !state.agents.heartbeat(&name).await {
        return error_response(StatusCode::NOT_FOUND, format!("unknown agent '{}'", name))
            .into_response();
    }
    match state.agents.status(&name).await {
        Some(status) => Json(status).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// A finished unit of agent work
#[derive(Debug, Deserialize)]
pub struct TaskReport {
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

async fn agent_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(report): Json<TaskReport>,
) -> impl IntoResponse {
    let outcome = if report.success {
        Ok(())
    } else {
        Err(report.error.unwrap_or_else(|| "task failed".to_string()))
    };
    let duration = Duration::from_millis(report.duration_ms);

    if !state.agents.record_task(&name, duration, outcome).await {
        return error_response(StatusCode::NOT_FOUND, format!("unknown agent '{}'", name))
            .into_response();
    }
    match state.agents.status(&name).await {
        Some(status) => Json(status).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn agents_performance(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "agents": state.agents.performance().await,
        "timestamp": Utc::now(),
    }))
}

async fn alerts(State(state): State<AppState>) -> impl IntoResponse {
    let window = Duration::from_secs(state.settings.alerts.summary_window_hours * 3600);
    Json(serde_json::json!({
        "active": state.alerts.get_active_alerts().await,
        "summary": state.alerts.get_alert_summary(window).await,
    }))
}

async fn resolve_alert(State(state): State<AppState>, Path(id): Path<u64>) -> impl IntoResponse {
    if state.alerts.resolve_alert(id).await {
        Json(serde_json::json!({ "id": id, "resolved": true })).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, format!("alert {} not found", id)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_services_bucket() {
        assert_eq!(services_bucket(0, 0), "healthy");
        assert_eq!(services_bucket(4, 4), "healthy");
        assert_eq!(services_bucket(3, 4), "degraded");
        assert_eq!(services_bucket(2, 4), "degraded");
        assert_eq!(services_bucket(1, 4), "unhealthy");
        assert_eq!(services_bucket(0, 4), "critical");
    }
}
