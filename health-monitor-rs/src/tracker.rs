//! Per-service lifecycle state machine.
//!
//! Every [`ServiceStatus`] is owned by the [`LifecycleTracker`]; callers only
//! ever see cloned snapshots.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use config_rs::MonitoringSettings;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{OrchestrationError, Result};
use crate::prober::HealthCheckResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Healthy,
    Unhealthy,
    Degraded,
    Failed,
}

impl ServiceState {
    /// Whether dependents may start on top of this service
    pub fn is_ready(&self) -> bool {
        matches!(self, ServiceState::Running | ServiceState::Healthy)
    }

    /// States reached after a successful bring-up, where probes move the
    /// service between healthy, degraded and unhealthy.
    fn is_monitored(&self) -> bool {
        matches!(
            self,
            ServiceState::Running
                | ServiceState::Healthy
                | ServiceState::Degraded
                | ServiceState::Unhealthy
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Healthy => "healthy",
            ServiceState::Unhealthy => "unhealthy",
            ServiceState::Degraded => "degraded",
            ServiceState::Failed => "failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub required: bool,
    pub state: ServiceState,
    pub state_changed_at: DateTime<Utc>,
    pub start_timestamp: Option<DateTime<Utc>>,
    /// When the service last became running or healthy
    pub ready_timestamp: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub total_health_checks: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_response_time_ms: Option<f64>,
    pub avg_response_time_ms: Option<f64>,
    pub recent_errors: VecDeque<String>,
    /// An alert was raised for the current failure run
    pub alert_raised: bool,
}

impl ServiceStatus {
    fn new(name: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            required,
            state: ServiceState::Stopped,
            state_changed_at: Utc::now(),
            start_timestamp: None,
            ready_timestamp: None,
            last_health_check: None,
            consecutive_successes: 0,
            consecutive_failures: 0,
            total_health_checks: 0,
            total_failures: 0,
            last_error: None,
            last_response_time_ms: None,
            avg_response_time_ms: None,
            recent_errors: VecDeque::new(),
            alert_raised: false,
        }
    }

    fn transition(&mut self, to: ServiceState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        self.state_changed_at = Utc::now();
        if to.is_ready() && !from.is_ready() {
            self.ready_timestamp = Some(self.state_changed_at);
        }

        match to {
            ServiceState::Failed | ServiceState::Unhealthy => warn!(
                service = %self.name,
                from = %from,
                to = %to,
                error = ?self.last_error,
                "Service state changed"
            ),
            _ => info!(service = %self.name, from = %from, to = %to, "Service state changed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Consecutive failures before a service is marked unhealthy; fewer
    /// leave it degraded.
    pub unhealthy_after: u32,
    /// Consecutive failures at which an alert becomes due
    pub alert_threshold: u32,
    /// Number of recent probe errors kept per service
    pub error_history: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            unhealthy_after: 1,
            alert_threshold: 3,
            error_history: 10,
        }
    }
}

impl From<&MonitoringSettings> for TrackerConfig {
    fn from(settings: &MonitoringSettings) -> Self {
        Self {
            unhealthy_after: settings.unhealthy_after.max(1),
            alert_threshold: settings.alert_threshold.max(1),
            error_history: settings.error_history,
        }
    }
}

/// What a recorded probe did to a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRecord {
    pub previous: ServiceState,
    pub current: ServiceState,
    pub consecutive_failures: u32,
    /// Set once per failure run, on the first probe at or past the alert
    /// threshold. Failures counted during startup carry over.
    pub alert_due: bool,
    /// The probe succeeded after at least one failure
    pub recovered: bool,
}

#[derive(Default)]
pub struct LifecycleTracker {
    config: TrackerConfig,
    statuses: RwLock<HashMap<String, ServiceStatus>>,
}

impl LifecycleTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            statuses: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Starts tracking a service in the `stopped` state, replacing any
    /// previous status under the same name.
    pub async fn track(&self, name: &str, required: bool) {
        self.statuses
            .write()
            .await
            .insert(name.to_string(), ServiceStatus::new(name, required));
    }

    /// Moves a service to `starting`. Returns `false` without changing
    /// anything if it is already starting or up.
    pub async fn mark_starting(&self, name: &str) -> Result<bool> {
        self.update(name, |status| {
            if matches!(
                status.state,
                ServiceState::Starting | ServiceState::Running | ServiceState::Healthy
            ) {
                debug!(service = %name, state = %status.state, "Service already starting or running");
                return false;
            }
            status.start_timestamp = Some(Utc::now());
            status.ready_timestamp = None;
            status.consecutive_successes = 0;
            status.consecutive_failures = 0;
            status.alert_raised = false;
            status.transition(ServiceState::Starting);
            true
        })
        .await
    }

    /// Marks a service without a health check as up.
    pub async fn mark_running(&self, name: &str) -> Result<()> {
        self.update(name, |status| status.transition(ServiceState::Running))
            .await
    }

    pub async fn mark_healthy(&self, name: &str) -> Result<()> {
        self.update(name, |status| status.transition(ServiceState::Healthy))
            .await
    }

    /// Forces a service into `failed`, ending its current startup attempt.
    pub async fn mark_failed(&self, name: &str, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        let history = self.config.error_history;
        self.update(name, |status| {
            push_error(&mut status.recent_errors, error.clone(), history);
            status.last_error = Some(error);
            status.transition(ServiceState::Failed);
        })
        .await
    }

    /// Applies one probe result.
    ///
    /// Counters are always updated. State only moves for services that have
    /// completed bring-up; while `starting` the orchestrator decides the
    /// outcome, and `failed` stays put until the next restart.
    pub async fn record_probe(&self, name: &str, result: &HealthCheckResult) -> Result<ProbeRecord> {
        let config = self.config;
        self.update(name, |status| {
            let previous = status.state;
            status.total_health_checks += 1;
            status.last_health_check = Some(result.timestamp);
            status.last_response_time_ms = Some(result.response_time_ms);
            let n = status.total_health_checks as f64;
            status.avg_response_time_ms = Some(match status.avg_response_time_ms {
                Some(avg) => avg + (result.response_time_ms - avg) / n,
                None => result.response_time_ms,
            });

            if result.healthy {
                let recovered = status.consecutive_failures > 0;
                status.consecutive_successes += 1;
                status.consecutive_failures = 0;
                status.alert_raised = false;
                if matches!(
                    previous,
                    ServiceState::Running | ServiceState::Unhealthy | ServiceState::Degraded
                ) {
                    status.transition(ServiceState::Healthy);
                }
                return ProbeRecord {
                    previous,
                    current: status.state,
                    consecutive_failures: 0,
                    alert_due: false,
                    recovered,
                };
            }

            let error = result
                .error
                .clone()
                .unwrap_or_else(|| "health check failed".to_string());
            status.consecutive_successes = 0;
            status.consecutive_failures += 1;
            status.total_failures += 1;
            push_error(&mut status.recent_errors, error.clone(), config.error_history);
            status.last_error = Some(error);

            if previous.is_monitored() {
                let next = if status.consecutive_failures >= config.unhealthy_after {
                    ServiceState::Unhealthy
                } else {
                    ServiceState::Degraded
                };
                status.transition(next);
            }

            // Bring-up failures count towards the threshold but only alert
            // once the orchestrator has settled the outcome.
            let alert_due = previous != ServiceState::Starting
                && !status.alert_raised
                && status.consecutive_failures >= config.alert_threshold;
            status.alert_raised |= alert_due;

            ProbeRecord {
                previous,
                current: status.state,
                consecutive_failures: status.consecutive_failures,
                alert_due,
                recovered: false,
            }
        })
        .await
    }

    pub async fn status(&self, name: &str) -> Option<ServiceStatus> {
        self.statuses.read().await.get(name).cloned()
    }

    pub async fn state(&self, name: &str) -> Option<ServiceState> {
        self.statuses.read().await.get(name).map(|s| s.state)
    }

    /// Snapshot of every tracked service, sorted by name
    pub async fn snapshot(&self) -> Vec<ServiceStatus> {
        let mut statuses: Vec<ServiceStatus> =
            self.statuses.read().await.values().cloned().collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    async fn update<T>(&self, name: &str, f: impl FnOnce(&mut ServiceStatus) -> T) -> Result<T> {
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .get_mut(name)
            .ok_or_else(|| OrchestrationError::UnknownService(name.to_string()))?;
        Ok(f(status))
    }
}

fn push_error(history: &mut VecDeque<String>, error: String, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while history.len() >= capacity {
        history.pop_front();
    }
    history.push_back(error);
}
