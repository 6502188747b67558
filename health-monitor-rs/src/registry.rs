//! Service descriptors and the registry that owns them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use config_rs::ServiceSettings;
use tracing::{debug, info};

use crate::error::{OrchestrationError, Result};
use crate::tracker::LifecycleTracker;

pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Static description of a managed service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub required: bool,
    /// URL probed with a GET; `None` means the service is assumed healthy
    /// once its grace period has elapsed.
    pub health_check_target: Option<String>,
    pub health_check_timeout: Duration,
    pub startup_timeout: Duration,
    /// Names of services that must be ready first, in declaration order
    pub dependencies: Vec<String>,
    pub description: String,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            health_check_target: None,
            health_check_timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            dependencies: Vec::new(),
            description: String::new(),
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn health_check(mut self, target: impl Into<String>) -> Self {
        self.health_check_target = Some(target.into());
        self
    }

    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Adds a dependency; repeated names are ignored.
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        let dependency = dependency.into();
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| OrchestrationError::InvalidDescriptor {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.health_check_timeout.is_zero() {
            return Err(invalid("health check timeout must be positive"));
        }
        if self.startup_timeout.is_zero() {
            return Err(invalid("startup timeout must be positive"));
        }
        if self.dependencies.iter().any(|d| d == &self.name) {
            return Err(OrchestrationError::SelfDependency(self.name.clone()));
        }
        Ok(())
    }
}

impl From<&ServiceSettings> for ServiceDescriptor {
    fn from(settings: &ServiceSettings) -> Self {
        let mut descriptor = ServiceDescriptor::new(settings.name.clone())
            .required(settings.required)
            .health_check_timeout(Duration::from_secs(settings.health_check_timeout_secs))
            .startup_timeout(Duration::from_secs(settings.startup_timeout_secs))
            .description(settings.description.clone());

        if let Some(url) = settings.health_check_url.as_deref().filter(|u| !u.is_empty()) {
            descriptor = descriptor.health_check(url);
        }
        for dependency in &settings.depends_on {
            descriptor = descriptor.depends_on(dependency.clone());
        }
        descriptor
    }
}

/// Registered services in registration order, plus the tracker holding
/// their runtime status.
pub struct ServiceRegistry {
    descriptors: Vec<ServiceDescriptor>,
    index: HashMap<String, usize>,
    tracker: Arc<LifecycleTracker>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::with_tracker(Arc::new(LifecycleTracker::default()))
    }

    pub fn with_tracker(tracker: Arc<LifecycleTracker>) -> Self {
        Self {
            descriptors: Vec::new(),
            index: HashMap::new(),
            tracker,
        }
    }

    /// Builds a registry from configured services, in file order.
    pub async fn from_settings(
        services: &[ServiceSettings],
        tracker: Arc<LifecycleTracker>,
    ) -> Result<Self> {
        let mut registry = Self::with_tracker(tracker);
        for service in services {
            registry.register(ServiceDescriptor::from(service)).await?;
        }
        Ok(registry)
    }

    /// Adds a service and starts tracking it in the `stopped` state.
    ///
    /// Dependencies may name services that are registered later; unknown
    /// names are reported by the resolver.
    pub async fn register(&mut self, descriptor: ServiceDescriptor) -> Result<()> {
        descriptor.validate()?;

        if self.index.contains_key(&descriptor.name) {
            return Err(OrchestrationError::DuplicateService(descriptor.name));
        }

        self.tracker
            .track(&descriptor.name, descriptor.required)
            .await;

        info!(
            service = %descriptor.name,
            required = descriptor.required,
            dependencies = ?descriptor.dependencies,
            "Registered service"
        );

        self.index
            .insert(descriptor.name.clone(), self.descriptors.len());
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    pub fn require(&self, name: &str) -> Result<&ServiceDescriptor> {
        self.get(name)
            .ok_or_else(|| OrchestrationError::UnknownService(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Descriptors in registration order
    pub fn descriptors(&self) -> &[ServiceDescriptor] {
        &self.descriptors
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn tracker(&self) -> &Arc<LifecycleTracker> {
        &self.tracker
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        debug!("Creating empty service registry");
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::ServiceState;

    #[tokio::test]
    async fn test_register_creates_stopped_status() {
        let mut registry = ServiceRegistry::new();
        registry
            .register(ServiceDescriptor::new("database").health_check("http://db/health"))
            .await
            .unwrap();

        assert!(registry.contains("database"));
        let status = registry.tracker().status("database").await.unwrap();
        assert_eq!(status.state, ServiceState::Stopped);
        assert!(status.required);
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let mut registry = ServiceRegistry::new();
        registry.register(ServiceDescriptor::new("cache")).await.unwrap();

        let err = registry
            .register(ServiceDescriptor::new("cache").required(false))
            .await
            .unwrap_err();
        assert_eq!(err, OrchestrationError::DuplicateService("cache".into()));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_self_dependency_is_rejected() {
        let mut registry = ServiceRegistry::new();
        let err = registry
            .register(ServiceDescriptor::new("loop").depends_on("loop"))
            .await
            .unwrap_err();
        assert_eq!(err, OrchestrationError::SelfDependency("loop".into()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_zero_timeout_is_invalid() {
        let mut registry = ServiceRegistry::new();
        let err = registry
            .register(ServiceDescriptor::new("api").startup_timeout(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidDescriptor { .. }));
    }

    #[test]
    fn test_descriptor_from_settings() {
        let settings = ServiceSettings {
            name: "docusign".into(),
            required: false,
            health_check_url: Some(String::new()),
            health_check_timeout_secs: 3,
            startup_timeout_secs: 20,
            depends_on: vec!["database".into(), "database".into()],
            description: "e-signature".into(),
        };

        let descriptor = ServiceDescriptor::from(&settings);
        assert!(!descriptor.required);
        assert_eq!(descriptor.health_check_target, None);
        assert_eq!(descriptor.health_check_timeout, Duration::from_secs(3));
        assert_eq!(descriptor.dependencies, vec!["database".to_string()]);
    }

    #[tokio::test]
    async fn test_registration_order_is_preserved() {
        let mut registry = ServiceRegistry::new();
        for name in ["websocket", "database", "cache"] {
            registry.register(ServiceDescriptor::new(name)).await.unwrap();
        }
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["websocket", "database", "cache"]);
    }
}
