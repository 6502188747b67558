//! Aggregates component checks into one system status.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::{gauge, histogram};
use tracing::{debug, warn};

use crate::components::ComponentCheck;
use crate::status::{AggregatedHealth, ComponentHealth};

pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HealthAggregator {
    components: Vec<Arc<dyn ComponentCheck>>,
    check_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(check_timeout: Duration) -> Self {
        Self {
            components: Vec::new(),
            check_timeout,
        }
    }

    pub fn with_component(mut self, component: Arc<dyn ComponentCheck>) -> Self {
        self.register(component);
        self
    }

    /// Adds a component check. Names are unique; a second check under an
    /// existing name is ignored and `false` is returned.
    pub fn register(&mut self, component: Arc<dyn ComponentCheck>) -> bool {
        if self.components.iter().any(|c| c.name() == component.name()) {
            warn!(component = component.name(), "Duplicate component check ignored");
            return false;
        }
        debug!(component = component.name(), kind = ?component.kind(), "Registered component check");
        self.components.push(component);
        true
    }

    pub fn component_names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    /// Runs the check for one component, or `None` if no such component is
    /// registered.
    pub async fn get_component_health(&self, name: &str) -> Option<ComponentHealth> {
        let component = self.components.iter().find(|c| c.name() == name)?;
        Some(guarded_check(component.clone(), self.check_timeout).await)
    }

    /// Checks every component concurrently and folds the results.
    pub async fn get_overall_health(&self) -> AggregatedHealth {
        let start = Instant::now();
        let results = join_all(
            self.components
                .iter()
                .map(|c| guarded_check(c.clone(), self.check_timeout)),
        )
        .await;

        let health = AggregatedHealth::from_components(results);
        histogram!("health.aggregate_ms", start.elapsed().as_secs_f64() * 1000.0);
        gauge!(
            "health.unhealthy_components",
            health
                .components
                .values()
                .filter(|c| !c.status.is_healthy())
                .count() as f64
        );
        debug!(status = %health.status, components = health.components.len(), "Aggregated health");
        health
    }
}

impl Default for HealthAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_TIMEOUT)
    }
}

/// Runs a check in its own task so that an error, a panic or a hang only
/// affects that component's result.
async fn guarded_check(component: Arc<dyn ComponentCheck>, timeout: Duration) -> ComponentHealth {
    let name = component.name().to_string();
    let kind = component.kind();
    let required = component.required();

    let task = tokio::spawn(async move { component.check().await });
    let abort = task.abort_handle();

    let error = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(mut health))) => {
            // Identity comes from the registration, not the check body.
            health.name = name;
            health.kind = kind;
            health.required = required;
            return health;
        }
        Ok(Ok(Err(e))) => e.to_string(),
        Ok(Err(join_error)) if join_error.is_panic() => "health check panicked".to_string(),
        Ok(Err(_)) => "health check cancelled".to_string(),
        Err(_) => {
            abort.abort();
            format!("health check timed out after {}ms", timeout.as_millis())
        }
    };

    warn!(component = %name, error = %error, "Component health check failed");
    ComponentHealth::unhealthy(name, kind, required, error)
}
