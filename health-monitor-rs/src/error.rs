use thiserror::Error;

/// Configuration errors of the orchestration subsystem.
///
/// These indicate a deployment mistake and are raised before any service is
/// started. Probe failures are never reported through this type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error("service '{0}' is already registered")]
    DuplicateService(String),

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("service '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("invalid descriptor for service '{name}': {reason}")]
    InvalidDescriptor { name: String, reason: String },
}

pub type Result<T, E = OrchestrationError> = std::result::Result<T, E>;
