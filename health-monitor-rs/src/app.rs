//! Builds the full object graph from settings.
//!
//! One instance of every component is created per process and handed to its
//! consumers explicitly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use config_rs::Settings;
use error_handling::RetryPolicy;
use tokio::sync::RwLock;
use tracing::info;

use crate::agents::{AgentConfig, AgentMonitor, AgentsCheck};
use crate::aggregator::HealthAggregator;
use crate::alerts::{AlertManager, BroadcastSink};
use crate::api::AppState;
use crate::automation::{
    AutomationConfig, AutomationService, LogDirectoryFixer, ReconnectFixer, Remediation,
};
use crate::components::{
    CacheCheck, Connection, DatabaseCheck, HttpVectorStore, LoggingCheck, ServiceComponent,
    TcpConnection, VectorStoreCheck,
};
use crate::monitor::ServiceMonitor;
use crate::orchestrator::{StartupConfig, StartupOrchestrator};
use crate::prober::{HttpProber, Prober};
use crate::registry::ServiceRegistry;
use crate::resolver::resolve_order;
use crate::tracker::{LifecycleTracker, TrackerConfig};

pub struct App {
    pub state: AppState,
    pub monitor: Arc<ServiceMonitor>,
    /// Alert events for the WebSocket notification hub
    pub notifications: Arc<BroadcastSink>,
    pub startup_order: Vec<String>,
}

pub async fn build(settings: Settings) -> anyhow::Result<App> {
    let prober = HttpProber::new().context("Failed to create health prober")?;
    build_with_prober(settings, Arc::new(prober)).await
}

/// Builds the application with the given prober.
///
/// Configuration errors (duplicate services, unknown dependencies, cycles)
/// are returned here, before anything starts.
pub async fn build_with_prober(settings: Settings, prober: Arc<dyn Prober>) -> anyhow::Result<App> {
    let tracker = Arc::new(LifecycleTracker::new(TrackerConfig::from(&settings.monitoring)));
    let registry = ServiceRegistry::from_settings(&settings.services, tracker.clone())
        .await
        .context("Invalid service configuration")?;
    let startup_order = resolve_order(&registry).context("Invalid service dependencies")?;
    let registry = Arc::new(registry);

    let notifications = Arc::new(BroadcastSink::new(256));
    let alerts = Arc::new(AlertManager::new(settings.alerts.capacity).with_sink(notifications.clone()));

    let agents = Arc::new(AgentMonitor::new(AgentConfig::from(&settings.agents)));
    for name in &settings.agents.names {
        agents.register(name).await;
    }

    let components = &settings.components;
    let probe_timeout = Duration::from_secs(components.probe_timeout_secs.max(1));
    let policy = RetryPolicy {
        max_attempts: settings.automation.remediation_attempts.max(1),
        base_backoff: Duration::from_millis(settings.automation.remediation_backoff_ms),
        ..Default::default()
    };

    let mut aggregator = HealthAggregator::new(probe_timeout);
    let mut fixers: Vec<Arc<dyn Remediation>> = Vec::new();

    let log_dirs = settings.automation.log_dirs.clone();
    if !log_dirs.is_empty() {
        aggregator.register(Arc::new(LoggingCheck::new(log_dirs.clone())));
        fixers.push(Arc::new(LogDirectoryFixer::new(log_dirs)));
    }

    if let Some(addr) = &components.database_addr {
        let conn: Arc<dyn Connection> = Arc::new(TcpConnection::new(addr.clone(), probe_timeout));
        aggregator.register(Arc::new(DatabaseCheck::new(conn.clone())));
        fixers.push(Arc::new(ReconnectFixer::database(conn, policy.clone())));
    }

    if let Some(addr) = &components.cache_addr {
        let conn: Arc<dyn Connection> = Arc::new(TcpConnection::new(addr.clone(), probe_timeout));
        aggregator.register(Arc::new(CacheCheck::new(conn.clone())));
        fixers.push(Arc::new(ReconnectFixer::cache(conn, policy.clone())));
    }

    if let Some(url) = &components.vector_store_url {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create vector store client")?;
        let store = HttpVectorStore::new(client, url.clone(), probe_timeout);
        aggregator.register(Arc::new(VectorStoreCheck::new(Arc::new(store))));
    }

    for descriptor in registry.descriptors() {
        aggregator.register(Arc::new(ServiceComponent::new(
            descriptor.name.clone(),
            descriptor.required,
            tracker.clone(),
        )));
    }

    if !settings.agents.names.is_empty() {
        aggregator.register(Arc::new(AgentsCheck::new(agents.clone())));
    }

    let aggregator = Arc::new(aggregator);

    let mut automation = AutomationService::new(
        aggregator.clone(),
        alerts.clone(),
        AutomationConfig::from(&settings.automation),
    );
    for fixer in fixers {
        automation = automation.with_fixer(fixer);
    }

    let orchestrator = Arc::new(StartupOrchestrator::new(
        registry.clone(),
        prober.clone(),
        StartupConfig::from(&settings.startup),
    ));

    let monitor = Arc::new(ServiceMonitor::new(
        registry.clone(),
        prober,
        alerts.clone(),
        Duration::from_secs(settings.monitoring.interval_secs.max(1)),
    ));

    info!(
        services = registry.len(),
        components = aggregator.component_names().len(),
        order = ?startup_order,
        "Health monitor assembled"
    );

    let state = AppState {
        settings: Arc::new(settings),
        started_at: Instant::now(),
        registry,
        orchestrator,
        aggregator,
        alerts,
        automation: Arc::new(automation),
        agents,
        startup: Arc::new(RwLock::new(None)),
    };

    Ok(App {
        state,
        monitor,
        notifications,
        startup_order,
    })
}

impl App {
    /// Runs the startup sequence, publishes the report and starts the
    /// per-service monitors.
    pub async fn run_startup(&self) -> anyhow::Result<()> {
        let report = self.state.orchestrator.start_all().await?;
        *self.state.startup.write().await = Some(report);
        self.monitor.start_all().await?;
        Ok(())
    }

    /// Stops every background task owned by the application.
    pub async fn shutdown(&self) {
        self.monitor.shutdown().await;
        self.state.automation.shutdown().await;
    }
}
