//! Periodic self-healing for known failure classes.

use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config_rs::AutomationSettings;
use error_handling::{retry, Error, ErrorKind, RetryPolicy};
use futures::FutureExt;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::HealthAggregator;
use crate::alerts::{AlertManager, AlertSeverity};
use crate::components::{Connection, LogDirState};
use crate::status::{AggregatedHealth, HealthStatus};

/// An idempotent fix for one failure class.
#[async_trait]
pub trait Remediation: Send + Sync {
    fn name(&self) -> &str;

    /// Health component this fixer repairs
    fn component(&self) -> &str {
        self.name()
    }

    /// Describes the issue if this fixer applies to the given health.
    fn detect(&self, health: &AggregatedHealth) -> Option<String>;

    /// Attempts the fix, returning a description of the action taken.
    async fn remediate(&self) -> error_handling::Result<String>;

    /// Whether a failed remediation should raise an alert.
    fn escalate(&self) -> bool {
        true
    }
}

/// Recreates missing log directories.
pub struct LogDirectoryFixer {
    dirs: Vec<PathBuf>,
}

impl LogDirectoryFixer {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    fn missing(&self) -> Vec<&PathBuf> {
        self.dirs
            .iter()
            .filter(|d| LogDirState::inspect(d) == LogDirState::Missing)
            .collect()
    }
}

#[async_trait]
impl Remediation for LogDirectoryFixer {
    fn name(&self) -> &str {
        "log_directories"
    }

    fn component(&self) -> &str {
        "logging"
    }

    fn detect(&self, _health: &AggregatedHealth) -> Option<String> {
        let missing = self.missing();
        if missing.is_empty() {
            return None;
        }
        let names: Vec<String> = missing.iter().map(|d| d.display().to_string()).collect();
        Some(format!("missing log directories: {}", names.join(", ")))
    }

    async fn remediate(&self) -> error_handling::Result<String> {
        let missing: Vec<PathBuf> = self.missing().into_iter().cloned().collect();
        for dir in &missing {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::new(
                    ErrorKind::IO,
                    format!("failed to create log directory {}", dir.display()),
                )
                .cause(e)
            })?;
        }

        let names: Vec<String> = missing.iter().map(|d| d.display().to_string()).collect();
        Ok(format!("created log directories: {}", names.join(", ")))
    }
}

/// Reconnects a backing store whose component reports unhealthy.
pub struct ReconnectFixer {
    component: String,
    conn: Arc<dyn Connection>,
    policy: RetryPolicy,
    escalate: bool,
}

impl ReconnectFixer {
    pub fn database(conn: Arc<dyn Connection>, policy: RetryPolicy) -> Self {
        Self {
            component: "database".to_string(),
            conn,
            policy,
            escalate: true,
        }
    }

    /// The cache is optional, so a failed reconnect is only logged.
    pub fn cache(conn: Arc<dyn Connection>, policy: RetryPolicy) -> Self {
        Self {
            component: "cache".to_string(),
            conn,
            policy,
            escalate: false,
        }
    }
}

#[async_trait]
impl Remediation for ReconnectFixer {
    fn name(&self) -> &str {
        &self.component
    }

    fn detect(&self, health: &AggregatedHealth) -> Option<String> {
        let component = health.component(&self.component)?;
        (component.status == HealthStatus::Unhealthy).then(|| {
            format!(
                "{} unreachable: {}",
                self.component,
                component.error.as_deref().unwrap_or("no response")
            )
        })
    }

    async fn remediate(&self) -> error_handling::Result<String> {
        let operation = format!("reconnect_{}", self.component);
        let conn = &self.conn;
        retry(&self.policy, &operation, || async move { conn.reconnect().await }).await?;
        Ok(format!("reconnected {} ({})", self.component, self.conn.describe()))
    }

    fn escalate(&self) -> bool {
        self.escalate
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AutomationRunRecord {
    pub timestamp: DateTime<Utc>,
    pub overall_status: HealthStatus,
    pub actions_taken: Vec<String>,
    pub issues_detected: Vec<String>,
    pub manual: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutomationStatus {
    pub enabled: bool,
    pub running: bool,
    pub interval_secs: u64,
    pub fixers: Vec<String>,
    pub last_run: Option<AutomationRunRecord>,
    pub history: Vec<AutomationRunRecord>,
}

#[derive(Debug, Clone)]
pub struct AutomationConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub history_capacity: usize,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            history_capacity: 100,
        }
    }
}

impl From<&AutomationSettings> for AutomationConfig {
    fn from(settings: &AutomationSettings) -> Self {
        Self {
            enabled: settings.enabled,
            interval: Duration::from_secs(settings.interval_secs.max(1)),
            history_capacity: settings.history_capacity.max(1),
        }
    }
}

pub struct AutomationService {
    aggregator: Arc<HealthAggregator>,
    alerts: Arc<AlertManager>,
    fixers: Vec<Arc<dyn Remediation>>,
    enabled: AtomicBool,
    interval: Duration,
    capacity: usize,
    history: Mutex<VecDeque<AutomationRunRecord>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl AutomationService {
    pub fn new(
        aggregator: Arc<HealthAggregator>,
        alerts: Arc<AlertManager>,
        config: AutomationConfig,
    ) -> Self {
        Self {
            aggregator,
            alerts,
            fixers: Vec::new(),
            enabled: AtomicBool::new(config.enabled),
            interval: config.interval,
            capacity: config.history_capacity.max(1),
            history: Mutex::new(VecDeque::new()),
            task: Mutex::new(None),
        }
    }

    pub fn with_fixer(mut self, fixer: Arc<dyn Remediation>) -> Self {
        self.fixers.push(fixer);
        self
    }

    pub fn enable(&self) {
        if !self.enabled.swap(true, Ordering::SeqCst) {
            info!("Health automation enabled");
        }
    }

    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            info!("Health automation disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Starts the scheduled loop. Ticks are skipped while disabled.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            debug!("Health automation loop already running");
            return;
        }

        let token = CancellationToken::new();
        let service = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the first check waits a full
            // interval so startup can settle.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if service.is_enabled() {
                    service.run_check(false).await;
                }
            }
            debug!("Health automation loop exited");
        });

        *task = Some((token, handle));
        info!(interval_secs = self.interval.as_secs(), "Health automation started");
    }

    /// Stops the scheduled loop and waits for it to exit.
    pub async fn shutdown(&self) {
        let task = self.task.lock().await.take();
        if let Some((token, handle)) = task {
            token.cancel();
            if let Err(e) = handle.await {
                error!(error = %e, "Health automation task ended abnormally");
            }
            info!("Health automation stopped");
        }
    }

    /// Runs one check immediately, regardless of the enabled flag.
    pub async fn run_manual_check(&self) -> AutomationRunRecord {
        self.run_check(true).await
    }

    pub async fn history(&self) -> Vec<AutomationRunRecord> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub async fn status(&self) -> AutomationStatus {
        let history = self.history().await;
        AutomationStatus {
            enabled: self.is_enabled(),
            running: self.task.lock().await.is_some(),
            interval_secs: self.interval.as_secs(),
            fixers: self.fixers.iter().map(|f| f.name().to_string()).collect(),
            last_run: history.last().cloned(),
            history,
        }
    }

    async fn run_check(&self, manual: bool) -> AutomationRunRecord {
        let start = Instant::now();
        let health = self.aggregator.get_overall_health().await;

        let mut actions_taken = Vec::new();
        let mut issues_detected = Vec::new();
        let mut covered: Vec<&str> = Vec::new();

        for fixer in &self.fixers {
            let Some(issue) = fixer.detect(&health) else {
                continue;
            };
            covered.push(fixer.component());
            info!(fixer = fixer.name(), issue = %issue, "Issue detected");

            let outcome = AssertUnwindSafe(fixer.remediate()).catch_unwind().await;
            match outcome {
                Ok(Ok(action)) => {
                    info!(fixer = fixer.name(), action = %action, "Remediation succeeded");
                    counter!("health.remediations", 1, "fixer" => fixer.name().to_string(), "outcome" => "success");
                    actions_taken.push(action);
                }
                Ok(Err(e)) => {
                    self.remediation_failed(fixer.as_ref(), &issue, &e.to_string()).await;
                    issues_detected.push(format!("{} (remediation failed: {})", issue, e));
                }
                Err(_) => {
                    self.remediation_failed(fixer.as_ref(), &issue, "remediation panicked").await;
                    issues_detected.push(format!("{} (remediation panicked)", issue));
                }
            }
        }

        // Component problems no fixer picked up are still reported.
        for component in health.components.values() {
            if component.status.is_healthy() || covered.contains(&component.name.as_str()) {
                continue;
            }
            let mut issue = format!("{} is {}", component.name, component.status);
            if let Some(error) = &component.error {
                issue.push_str(&format!(": {}", error));
            }
            issues_detected.push(issue);
        }

        let record = AutomationRunRecord {
            timestamp: Utc::now(),
            overall_status: health.status,
            actions_taken,
            issues_detected,
            manual,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            manual,
            status = %record.overall_status,
            actions = record.actions_taken.len(),
            issues = record.issues_detected.len(),
            "Health automation check complete"
        );

        let mut history = self.history.lock().await;
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(record.clone());
        record
    }

    async fn remediation_failed(&self, fixer: &dyn Remediation, issue: &str, error: &str) {
        counter!("health.remediations", 1, "fixer" => fixer.name().to_string(), "outcome" => "failure");

        if !fixer.escalate() {
            warn!(fixer = fixer.name(), error = %error, "Remediation failed for optional component");
            return;
        }

        error!(fixer = fixer.name(), error = %error, "Remediation failed");
        let mut context = BTreeMap::new();
        context.insert("fixer".to_string(), Value::from(fixer.name()));
        context.insert("issue".to_string(), Value::from(issue));
        context.insert("error".to_string(), Value::from(error));
        self.alerts
            .create_alert(
                format!("Automatic remediation failed: {}", issue),
                AlertSeverity::High,
                context,
            )
            .await;
    }
}
