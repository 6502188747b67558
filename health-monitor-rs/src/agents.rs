//! Lifecycle and performance tracking for background AI agents.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config_rs::AgentSettings;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::components::ComponentCheck;
use crate::status::{ComponentHealth, ComponentKind, HealthStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Active,
    Idle,
    Stalled,
    Failed,
    Recovering,
}

impl From<AgentState> for HealthStatus {
    fn from(state: AgentState) -> Self {
        match state {
            AgentState::Active | AgentState::Idle => HealthStatus::Healthy,
            AgentState::Recovering => HealthStatus::Degraded,
            AgentState::Stalled | AgentState::Failed => HealthStatus::Unhealthy,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AgentConfig {
    /// Without a heartbeat or task for this long an agent counts as stalled
    pub stale_after: Duration,
    /// Consecutive task failures before an agent counts as failed
    pub failure_threshold: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
            failure_threshold: 3,
        }
    }
}

impl From<&AgentSettings> for AgentConfig {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            stale_after: Duration::from_secs(settings.stale_after_secs),
            failure_threshold: settings.failure_threshold.max(1),
        }
    }
}

#[derive(Debug, Clone)]
struct AgentRecord {
    registered_at: DateTime<Utc>,
    last_heartbeat: Option<DateTime<Utc>>,
    last_task_at: Option<DateTime<Utc>>,
    tasks_completed: u64,
    tasks_failed: u64,
    consecutive_failures: u32,
    total_task_ms: f64,
    max_task_ms: f64,
    last_error: Option<String>,
    recovering: bool,
    recoveries: u32,
}

impl AgentRecord {
    fn new() -> Self {
        Self {
            registered_at: Utc::now(),
            last_heartbeat: None,
            last_task_at: None,
            tasks_completed: 0,
            tasks_failed: 0,
            consecutive_failures: 0,
            total_task_ms: 0.0,
            max_task_ms: 0.0,
            last_error: None,
            recovering: false,
            recoveries: 0,
        }
    }

    fn last_seen(&self) -> DateTime<Utc> {
        [Some(self.registered_at), self.last_heartbeat, self.last_task_at]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.registered_at)
    }

    fn state(&self, config: &AgentConfig, now: DateTime<Utc>) -> AgentState {
        if self.recovering {
            return AgentState::Recovering;
        }
        if self.consecutive_failures >= config.failure_threshold {
            return AgentState::Failed;
        }

        let stale_after = chrono::Duration::from_std(config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::weeks(52));
        if now - self.last_seen() > stale_after {
            return AgentState::Stalled;
        }

        match self.last_task_at {
            Some(at) if now - at <= stale_after => AgentState::Active,
            _ => AgentState::Idle,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub name: String,
    pub state: AgentState,
    pub health: HealthStatus,
    pub last_seen: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub recoveries: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentPerformance {
    pub name: String,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub success_rate: f64,
    pub avg_task_ms: Option<f64>,
    pub max_task_ms: Option<f64>,
}

pub struct AgentMonitor {
    config: AgentConfig,
    agents: RwLock<HashMap<String, AgentRecord>>,
}

impl AgentMonitor {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, name: &str) {
        let mut agents = self.agents.write().await;
        if !agents.contains_key(name) {
            agents.insert(name.to_string(), AgentRecord::new());
            info!(agent = %name, "Registered agent");
        }
    }

    /// Records a heartbeat. Returns `false` for unknown agents.
    pub async fn heartbeat(&self, name: &str) -> bool {
        match self.agents.write().await.get_mut(name) {
            Some(record) => {
                record.last_heartbeat = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Records a finished task. Returns `false` for unknown agents.
    pub async fn record_task(
        &self,
        name: &str,
        duration: Duration,
        outcome: Result<(), String>,
    ) -> bool {
        let mut agents = self.agents.write().await;
        let Some(record) = agents.get_mut(name) else {
            return false;
        };

        let ms = duration.as_secs_f64() * 1000.0;
        record.last_task_at = Some(Utc::now());
        record.total_task_ms += ms;
        record.max_task_ms = record.max_task_ms.max(ms);

        match outcome {
            Ok(()) => {
                record.tasks_completed += 1;
                record.consecutive_failures = 0;
                if record.recovering {
                    record.recovering = false;
                    info!(agent = %name, "Agent recovered");
                }
            }
            Err(error) => {
                record.tasks_failed += 1;
                record.consecutive_failures += 1;
                warn!(
                    agent = %name,
                    consecutive_failures = record.consecutive_failures,
                    error = %error,
                    "Agent task failed"
                );
                record.last_error = Some(error);
            }
        }
        true
    }

    /// Puts an agent into recovery: failure counters are cleared and the
    /// agent reports `recovering` until its next successful task.
    pub async fn recover(&self, name: &str) -> Option<AgentStatus> {
        let now = Utc::now();
        let mut agents = self.agents.write().await;
        let record = agents.get_mut(name)?;

        record.consecutive_failures = 0;
        record.recovering = true;
        record.recoveries += 1;
        record.last_heartbeat = Some(now);
        info!(agent = %name, recoveries = record.recoveries, "Agent recovery requested");

        Some(self.to_status(name, record, now))
    }

    pub async fn statuses(&self) -> Vec<AgentStatus> {
        let now = Utc::now();
        let agents = self.agents.read().await;
        let mut statuses: Vec<AgentStatus> = agents
            .iter()
            .map(|(name, record)| self.to_status(name, record, now))
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub async fn status(&self, name: &str) -> Option<AgentStatus> {
        let agents = self.agents.read().await;
        agents
            .get(name)
            .map(|record| self.to_status(name, record, Utc::now()))
    }

    pub async fn performance(&self) -> Vec<AgentPerformance> {
        let agents = self.agents.read().await;
        let mut report: Vec<AgentPerformance> = agents
            .iter()
            .map(|(name, r)| {
                let total = r.tasks_completed + r.tasks_failed;
                AgentPerformance {
                    name: name.clone(),
                    tasks_completed: r.tasks_completed,
                    tasks_failed: r.tasks_failed,
                    success_rate: if total == 0 {
                        1.0
                    } else {
                        r.tasks_completed as f64 / total as f64
                    },
                    avg_task_ms: (total > 0).then(|| r.total_task_ms / total as f64),
                    max_task_ms: (total > 0).then_some(r.max_task_ms),
                }
            })
            .collect();
        report.sort_by(|a, b| a.name.cmp(&b.name));
        report
    }

    /// Worst agent status; healthy when no agents are registered.
    pub async fn overall(&self) -> HealthStatus {
        self.statuses()
            .await
            .iter()
            .map(|s| s.health)
            .fold(HealthStatus::Healthy, HealthStatus::worst)
    }

    fn to_status(&self, name: &str, record: &AgentRecord, now: DateTime<Utc>) -> AgentStatus {
        let state = record.state(&self.config, now);
        AgentStatus {
            name: name.to_string(),
            state,
            health: state.into(),
            last_seen: record.last_seen(),
            consecutive_failures: record.consecutive_failures,
            last_error: record.last_error.clone(),
            recoveries: record.recoveries,
        }
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new(AgentConfig::default())
    }
}

/// Exposes the agent subsystem as an optional aggregator component.
pub struct AgentsCheck {
    monitor: Arc<AgentMonitor>,
}

impl AgentsCheck {
    pub fn new(monitor: Arc<AgentMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl ComponentCheck for AgentsCheck {
    fn name(&self) -> &str {
        "agents"
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Agents
    }

    fn required(&self) -> bool {
        false
    }

    async fn check(&self) -> error_handling::Result<ComponentHealth> {
        let statuses = self.monitor.statuses().await;
        let status = statuses
            .iter()
            .map(|s| s.health)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        let unhealthy: Vec<&str> = statuses
            .iter()
            .filter(|s| !s.health.is_healthy())
            .map(|s| s.name.as_str())
            .collect();

        let mut health = ComponentHealth::new(self.name(), self.kind(), false, status)
            .with_detail("agents", statuses.len())
            .with_detail("unhealthy", unhealthy.len());
        if !unhealthy.is_empty() {
            health = health.with_error(format!("agents not healthy: {}", unhealthy.join(", ")));
        }
        Ok(health)
    }
}
