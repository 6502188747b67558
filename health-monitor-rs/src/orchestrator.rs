//! Dependency-ordered service bring-up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use config_rs::StartupSettings;
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::error::Result;
use crate::prober::Prober;
use crate::registry::{ServiceDescriptor, ServiceRegistry};
use crate::resolver::resolve_order;
use crate::tracker::ServiceState;

#[derive(Debug, Clone, Copy)]
pub struct StartupConfig {
    pub poll_interval: Duration,
    pub grace_period: Duration,
    pub dependency_poll_interval: Duration,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            grace_period: Duration::from_secs(2),
            dependency_poll_interval: Duration::from_secs(1),
        }
    }
}

impl From<&StartupSettings> for StartupConfig {
    fn from(settings: &StartupSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            grace_period: Duration::from_millis(settings.grace_period_ms),
            dependency_poll_interval: Duration::from_millis(
                settings.dependency_poll_interval_ms.max(1),
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceOutcome {
    pub name: String,
    pub required: bool,
    pub state: ServiceState,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ServiceOutcome {
    pub fn succeeded(&self) -> bool {
        self.state.is_ready()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub order: Vec<String>,
    pub services: Vec<ServiceOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StartupReport {
    /// Required services that did not come up
    pub fn required_failures(&self) -> Vec<&str> {
        self.services
            .iter()
            .filter(|s| s.required && !s.succeeded())
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        self.required_failures().is_empty()
    }
}

pub struct StartupOrchestrator {
    registry: Arc<ServiceRegistry>,
    prober: Arc<dyn Prober>,
    config: StartupConfig,
}

impl StartupOrchestrator {
    pub fn new(registry: Arc<ServiceRegistry>, prober: Arc<dyn Prober>, config: StartupConfig) -> Self {
        Self {
            registry,
            prober,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Brings every service up in dependency order.
    ///
    /// Only configuration errors are returned; a service that fails to come
    /// up is recorded in the report and the sequence continues.
    pub async fn start_all(&self) -> Result<StartupReport> {
        let order = resolve_order(&self.registry)?;
        let started_at = Utc::now();
        info!(order = ?order, "Starting services");

        let mut services = Vec::with_capacity(order.len());
        for name in &order {
            let descriptor = self.registry.require(name)?;
            services.push(self.bring_up(descriptor).await?);
        }

        let report = StartupReport {
            order,
            services,
            started_at,
            finished_at: Utc::now(),
        };

        let failures = report.required_failures();
        if failures.is_empty() {
            info!(
                services = report.services.len(),
                duration_ms = (report.finished_at - report.started_at).num_milliseconds(),
                "Service startup complete"
            );
        } else {
            warn!(failed = ?failures, "Required services failed to start");
        }
        Ok(report)
    }

    /// Re-runs bring-up for a single service, e.g. after it failed.
    pub async fn restart(&self, name: &str) -> Result<ServiceOutcome> {
        let descriptor = self.registry.require(name)?;
        info!(service = %name, "Restarting service");
        self.bring_up(descriptor).await
    }

    async fn bring_up(&self, descriptor: &ServiceDescriptor) -> Result<ServiceOutcome> {
        let tracker = self.registry.tracker();
        let name = descriptor.name.as_str();
        let start = Instant::now();
        let deadline = start + descriptor.startup_timeout;

        if !tracker.mark_starting(name).await? {
            let state = tracker.state(name).await.unwrap_or(ServiceState::Starting);
            return Ok(self.outcome(descriptor, state, None, start));
        }

        if let Err(reason) = self.wait_for_dependencies(descriptor, deadline).await {
            tracker.mark_failed(name, reason.clone()).await?;
            return Ok(self.outcome(descriptor, ServiceState::Failed, Some(reason), start));
        }

        if descriptor.health_check_target.is_none() {
            sleep(self.config.grace_period.min(remaining(deadline))).await;
            tracker.mark_running(name).await?;
            return Ok(self.outcome(descriptor, ServiceState::Running, None, start));
        }

        loop {
            let result = self.prober.probe(descriptor).await;
            tracker.record_probe(name, &result).await?;

            if result.healthy {
                tracker.mark_healthy(name).await?;
                return Ok(self.outcome(descriptor, ServiceState::Healthy, None, start));
            }

            if Instant::now() >= deadline {
                let reason = format!(
                    "startup timeout after {}s: {}",
                    descriptor.startup_timeout.as_secs_f64(),
                    result.error.as_deref().unwrap_or("health check failed")
                );
                tracker.mark_failed(name, reason.clone()).await?;
                return Ok(self.outcome(descriptor, ServiceState::Failed, Some(reason), start));
            }

            sleep(self.config.poll_interval.min(remaining(deadline))).await;
        }
    }

    /// Waits until every dependency is running or healthy.
    ///
    /// Gives up early when a dependency has already failed, since it will
    /// not recover without a restart.
    async fn wait_for_dependencies(
        &self,
        descriptor: &ServiceDescriptor,
        deadline: Instant,
    ) -> std::result::Result<(), String> {
        let tracker = self.registry.tracker();

        loop {
            let mut pending = Vec::new();
            for dependency in &descriptor.dependencies {
                match tracker.state(dependency).await {
                    Some(state) if state.is_ready() => {}
                    Some(ServiceState::Failed) => {
                        return Err(format!("dependency '{}' failed to start", dependency));
                    }
                    _ => pending.push(dependency.as_str()),
                }
            }

            if pending.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(format!(
                    "timed out waiting for dependencies: {}",
                    pending.join(", ")
                ));
            }

            sleep(self.config.dependency_poll_interval.min(remaining(deadline))).await;
        }
    }

    fn outcome(
        &self,
        descriptor: &ServiceDescriptor,
        state: ServiceState,
        error: Option<String>,
        start: Instant,
    ) -> ServiceOutcome {
        let duration = start.elapsed();
        counter!(
            "health.service_startups",
            1,
            "service" => descriptor.name.clone(),
            "state" => state.as_str()
        );
        histogram!(
            "health.service_startup_ms",
            duration.as_secs_f64() * 1000.0,
            "service" => descriptor.name.clone()
        );

        ServiceOutcome {
            name: descriptor.name.clone(),
            required: descriptor.required,
            state,
            error,
            duration_ms: duration.as_millis() as u64,
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::HealthCheckResult;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves scripted results per service; the last one repeats.
    struct ScriptedProber {
        scripts: Mutex<HashMap<String, Vec<bool>>>,
    }

    impl ScriptedProber {
        fn new(scripts: &[(&str, &[bool])]) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(
                    scripts
                        .iter()
                        .map(|(n, s)| (n.to_string(), s.to_vec()))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, descriptor: &ServiceDescriptor) -> HealthCheckResult {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(descriptor.name.clone()).or_default();
            let healthy = match script.len() {
                0 => true,
                1 => script[0],
                _ => script.remove(0),
            };
            if healthy {
                HealthCheckResult::from_status(200, 1.0)
            } else {
                HealthCheckResult::from_status(500, 1.0)
            }
        }
    }

    fn fast_config() -> StartupConfig {
        StartupConfig {
            poll_interval: Duration::from_millis(10),
            grace_period: Duration::from_millis(5),
            dependency_poll_interval: Duration::from_millis(5),
        }
    }

    async fn orchestrator(
        descriptors: Vec<ServiceDescriptor>,
        prober: Arc<dyn Prober>,
    ) -> StartupOrchestrator {
        let mut registry = ServiceRegistry::new();
        for descriptor in descriptors {
            registry.register(descriptor).await.unwrap();
        }
        StartupOrchestrator::new(Arc::new(registry), prober, fast_config())
    }

    #[tokio::test]
    async fn test_healthy_after_retries() {
        let prober = ScriptedProber::new(&[("db", &[false, false, true])]);
        let orch = orchestrator(
            vec![ServiceDescriptor::new("db").health_check("http://db/health")],
            prober,
        )
        .await;

        let report = orch.start_all().await.unwrap();
        assert!(report.is_ready());
        let status = orch.registry().tracker().status("db").await.unwrap();
        assert_eq!(status.state, ServiceState::Healthy);
        assert_eq!(status.total_health_checks, 3);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_no_target_becomes_running() {
        let orch = orchestrator(
            vec![ServiceDescriptor::new("websocket")],
            ScriptedProber::new(&[]),
        )
        .await;

        let report = orch.start_all().await.unwrap();
        assert_eq!(report.services[0].state, ServiceState::Running);
    }

    #[tokio::test]
    async fn test_timeout_marks_failed() {
        let orch = orchestrator(
            vec![ServiceDescriptor::new("docusign")
                .health_check("http://docusign/health")
                .startup_timeout(Duration::from_millis(50))],
            ScriptedProber::new(&[("docusign", &[false])]),
        )
        .await;

        let report = orch.start_all().await.unwrap();
        assert!(!report.is_ready());
        assert_eq!(report.required_failures(), vec!["docusign"]);

        let status = orch.registry().tracker().status("docusign").await.unwrap();
        assert_eq!(status.state, ServiceState::Failed);
        assert!(status.last_error.unwrap().contains("startup timeout"));
    }

    #[tokio::test]
    async fn test_optional_failure_keeps_readiness() {
        let orch = orchestrator(
            vec![
                ServiceDescriptor::new("database").health_check("http://db"),
                ServiceDescriptor::new("google_drive")
                    .required(false)
                    .health_check("http://drive")
                    .startup_timeout(Duration::from_millis(30)),
            ],
            ScriptedProber::new(&[("google_drive", &[false])]),
        )
        .await;

        let report = orch.start_all().await.unwrap();
        assert!(report.is_ready());
        assert_eq!(report.services[1].state, ServiceState::Failed);
    }

    #[tokio::test]
    async fn test_dependent_of_failed_service_fails() {
        let orch = orchestrator(
            vec![
                ServiceDescriptor::new("db")
                    .health_check("http://db")
                    .startup_timeout(Duration::from_millis(30)),
                ServiceDescriptor::new("api").depends_on("db"),
            ],
            ScriptedProber::new(&[("db", &[false])]),
        )
        .await;

        let report = orch.start_all().await.unwrap();
        let api = &report.services[1];
        assert_eq!(api.name, "api");
        assert_eq!(api.state, ServiceState::Failed);
        assert!(api.error.as_deref().unwrap().contains("dependency 'db'"));
    }

    #[tokio::test]
    async fn test_cycle_aborts_before_any_start() {
        let orch = orchestrator(
            vec![
                ServiceDescriptor::new("a").depends_on("b"),
                ServiceDescriptor::new("b").depends_on("a"),
            ],
            ScriptedProber::new(&[]),
        )
        .await;

        assert!(orch.start_all().await.is_err());
        let states: Vec<ServiceState> = orch
            .registry()
            .tracker()
            .snapshot()
            .await
            .into_iter()
            .map(|s| s.state)
            .collect();
        assert!(states.iter().all(|s| *s == ServiceState::Stopped));
    }

    #[tokio::test]
    async fn test_restart_failed_service() {
        let orch = orchestrator(
            vec![ServiceDescriptor::new("cache")
                .health_check("http://cache")
                .startup_timeout(Duration::from_millis(20))],
            ScriptedProber::new(&[("cache", &[false, false, false, false, true])]),
        )
        .await;

        orch.start_all().await.unwrap();
        assert_eq!(
            orch.registry().tracker().state("cache").await,
            Some(ServiceState::Failed)
        );

        // Later attempts eventually see the scripted success.
        let mut outcome = orch.restart("cache").await.unwrap();
        for _ in 0..5 {
            if outcome.succeeded() {
                break;
            }
            outcome = orch.restart("cache").await.unwrap();
        }
        assert_eq!(outcome.state, ServiceState::Healthy);
    }

    #[tokio::test]
    async fn test_restart_unknown_service() {
        let orch = orchestrator(vec![], ScriptedProber::new(&[])).await;
        assert!(orch.restart("ghost").await.is_err());
    }
}
