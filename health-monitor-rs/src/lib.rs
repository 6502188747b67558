//! Service health and dependency orchestration.
//!
//! Services are declared in a [`registry::ServiceRegistry`], ordered by
//! [`resolver::resolve_order`] and brought up by the
//! [`orchestrator::StartupOrchestrator`]. After startup a
//! [`monitor::ServiceMonitor`] keeps probing them, the
//! [`aggregator::HealthAggregator`] folds component checks into a single
//! status, and the [`automation::AutomationService`] repairs what it can.

pub mod agents;
pub mod aggregator;
pub mod alerts;
pub mod api;
pub mod app;
pub mod automation;
pub mod components;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod prober;
pub mod registry;
pub mod resolver;
pub mod status;
pub mod tracker;

pub use aggregator::HealthAggregator;
pub use alerts::{Alert, AlertManager, AlertSeverity};
pub use automation::{AutomationRunRecord, AutomationService};
pub use error::OrchestrationError;
pub use orchestrator::{StartupOrchestrator, StartupReport};
pub use prober::{HealthCheckResult, HttpProber, Prober};
pub use registry::{ServiceDescriptor, ServiceRegistry};
pub use resolver::resolve_order;
pub use status::{AggregatedHealth, ComponentHealth, HealthStatus};
pub use tracker::{LifecycleTracker, ServiceState, ServiceStatus};
