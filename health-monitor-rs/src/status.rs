//! Normalized health vocabulary shared by every component check.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tracker::ServiceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    fn rank(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Unknown => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 3,
        }
    }

    /// The more severe of two statuses
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ServiceState> for HealthStatus {
    fn from(state: ServiceState) -> Self {
        match state {
            ServiceState::Running | ServiceState::Healthy => HealthStatus::Healthy,
            ServiceState::Starting | ServiceState::Degraded => HealthStatus::Degraded,
            ServiceState::Unhealthy | ServiceState::Failed => HealthStatus::Unhealthy,
            ServiceState::Stopped => HealthStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Database,
    Cache,
    Logging,
    VectorStore,
    Service,
    Agents,
}

/// Uniform result of one component check
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub kind: ComponentKind,
    pub required: bool,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, kind: ComponentKind, required: bool, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            kind,
            required,
            status,
            error: None,
            response_time_ms: None,
            details: BTreeMap::new(),
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(
        name: impl Into<String>,
        kind: ComponentKind,
        required: bool,
        error: impl Into<String>,
    ) -> Self {
        Self::new(name, kind, required, HealthStatus::Unhealthy).with_error(error)
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_response_time(mut self, ms: f64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Contribution to the overall status: optional components never make
    /// the system worse than degraded, and an unknown status counts as
    /// degraded.
    pub fn effective_status(&self) -> HealthStatus {
        match (self.status, self.required) {
            (HealthStatus::Unknown, _) => HealthStatus::Degraded,
            (HealthStatus::Unhealthy, false) => HealthStatus::Degraded,
            (status, _) => status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedHealth {
    pub status: HealthStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    pub timestamp: DateTime<Utc>,
}

impl AggregatedHealth {
    pub fn from_components(components: Vec<ComponentHealth>) -> Self {
        let status = fold_overall(&components);
        Self {
            status,
            components: components.into_iter().map(|c| (c.name.clone(), c)).collect(),
            timestamp: Utc::now(),
        }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.get(name)
    }

    /// Components of the given kind whose status is not healthy
    pub fn failing(&self, kind: ComponentKind) -> impl Iterator<Item = &ComponentHealth> {
        self.components
            .values()
            .filter(move |c| c.kind == kind && !c.status.is_healthy())
    }
}

/// Worst-case-wins fold over component results. Empty input is healthy.
pub fn fold_overall(components: &[ComponentHealth]) -> HealthStatus {
    components
        .iter()
        .map(ComponentHealth::effective_status)
        .fold(HealthStatus::Healthy, HealthStatus::worst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(name: &str, required: bool, status: HealthStatus) -> ComponentHealth {
        ComponentHealth::new(name, ComponentKind::Service, required, status)
    }

    #[test]
    fn test_all_healthy() {
        let components = vec![
            component("database", true, HealthStatus::Healthy),
            component("cache", false, HealthStatus::Healthy),
        ];
        assert_eq!(fold_overall(&components), HealthStatus::Healthy);
    }

    #[test]
    fn test_degraded_beats_healthy() {
        let components = vec![
            component("database", true, HealthStatus::Healthy),
            component("logging", true, HealthStatus::Degraded),
        ];
        assert_eq!(fold_overall(&components), HealthStatus::Degraded);
    }

    #[test]
    fn test_required_unhealthy_wins() {
        let components = vec![
            component("database", true, HealthStatus::Unhealthy),
            component("logging", true, HealthStatus::Degraded),
            component("cache", false, HealthStatus::Healthy),
        ];
        assert_eq!(fold_overall(&components), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_optional_unhealthy_caps_at_degraded() {
        let components = vec![
            component("database", true, HealthStatus::Healthy),
            component("cache", false, HealthStatus::Unhealthy),
        ];
        assert_eq!(fold_overall(&components), HealthStatus::Degraded);
    }

    #[test]
    fn test_unknown_counts_as_degraded() {
        let components = vec![component("docusign", true, HealthStatus::Unknown)];
        assert_eq!(fold_overall(&components), HealthStatus::Degraded);
        assert_eq!(fold_overall(&[]), HealthStatus::Healthy);
    }

    #[test]
    fn test_service_state_mapping() {
        assert_eq!(HealthStatus::from(ServiceState::Running), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from(ServiceState::Starting), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from(ServiceState::Failed), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::from(ServiceState::Stopped), HealthStatus::Unknown);
    }

    #[test]
    fn test_serialized_shape() {
        let health = ComponentHealth::unhealthy("database", ComponentKind::Database, true, "refused")
            .with_detail("addr", "127.0.0.1:5432");
        let json = serde_json::to_value(&health).unwrap();

        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["kind"], "database");
        assert_eq!(json["error"], "refused");
        assert_eq!(json["details"]["addr"], "127.0.0.1:5432");
        assert!(json.get("response_time_ms").is_none());
    }
}
