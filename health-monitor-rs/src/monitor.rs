//! Supervised per-service health monitoring loops.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alerts::{AlertManager, AlertSeverity};
use crate::error::Result;
use crate::prober::Prober;
use crate::registry::{ServiceDescriptor, ServiceRegistry};

struct MonitorTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns one probing loop per service.
///
/// Each loop has its own cancellation token derived from the monitor's root
/// token, so a single service can be stopped without touching the others.
pub struct ServiceMonitor {
    registry: Arc<ServiceRegistry>,
    prober: Arc<dyn Prober>,
    alerts: Arc<AlertManager>,
    interval: Duration,
    root: CancellationToken,
    tasks: Mutex<HashMap<String, MonitorTask>>,
}

impl ServiceMonitor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        prober: Arc<dyn Prober>,
        alerts: Arc<AlertManager>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            prober,
            alerts,
            interval,
            root: CancellationToken::new(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts (or restarts) the loop for one service.
    pub async fn start(&self, name: &str) -> Result<()> {
        let descriptor = self.registry.require(name)?.clone();
        let token = self.root.child_token();

        let handle = tokio::spawn(run_loop(
            descriptor,
            self.registry.clone(),
            self.prober.clone(),
            self.alerts.clone(),
            self.interval,
            token.clone(),
        ));

        let previous = self
            .tasks
            .lock()
            .await
            .insert(name.to_string(), MonitorTask { token, handle });
        if let Some(previous) = previous {
            cancel_and_join(name, previous).await;
        }

        info!(service = %name, interval_secs = self.interval.as_secs_f64(), "Started health monitoring");
        Ok(())
    }

    pub async fn start_all(&self) -> Result<()> {
        for descriptor in self.registry.descriptors() {
            self.start(&descriptor.name).await?;
        }
        Ok(())
    }

    /// Stops the loop for one service. Returns `false` if none was running.
    pub async fn stop(&self, name: &str) -> bool {
        let task = self.tasks.lock().await.remove(name);
        match task {
            Some(task) => {
                cancel_and_join(name, task).await;
                info!(service = %name, "Stopped health monitoring");
                true
            }
            None => false,
        }
    }

    /// Names of services with a live monitoring loop
    pub async fn monitored(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tasks
            .lock()
            .await
            .iter()
            .filter(|(_, task)| !task.handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Cancels every loop and waits for all of them to exit.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let tasks: Vec<(String, MonitorTask)> = self.tasks.lock().await.drain().collect();
        let count = tasks.len();

        join_all(
            tasks
                .into_iter()
                .map(|(name, task)| async move { cancel_and_join(&name, task).await }),
        )
        .await;

        info!(tasks = count, "Health monitoring shut down");
    }
}

async fn cancel_and_join(name: &str, task: MonitorTask) {
    task.token.cancel();
    if let Err(e) = task.handle.await {
        if e.is_panic() {
            error!(service = %name, "Monitoring task panicked");
        }
    }
}

async fn run_loop(
    descriptor: ServiceDescriptor,
    registry: Arc<ServiceRegistry>,
    prober: Arc<dyn Prober>,
    alerts: Arc<AlertManager>,
    period: Duration,
    token: CancellationToken,
) {
    let name = descriptor.name.as_str();
    let tracker = registry.tracker();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut open_alert: Option<u64> = None;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = prober.probe(&descriptor) => result,
        };

        let record = match tracker.record_probe(name, &result).await {
            Ok(record) => record,
            Err(e) => {
                warn!(service = %name, error = %e, "Service no longer tracked, stopping monitor");
                break;
            }
        };

        if record.alert_due && open_alert.is_none() {
            let severity = if descriptor.required {
                AlertSeverity::High
            } else {
                AlertSeverity::Medium
            };
            let mut context = BTreeMap::new();
            context.insert("service".to_string(), Value::from(name));
            context.insert(
                "consecutive_failures".to_string(),
                Value::from(record.consecutive_failures),
            );
            if let Some(error) = &result.error {
                context.insert("error".to_string(), Value::from(error.as_str()));
            }

            let alert = alerts
                .create_alert(
                    format!(
                        "Service {} failed {} consecutive health checks",
                        name, record.consecutive_failures
                    ),
                    severity,
                    context,
                )
                .await;
            open_alert = Some(alert.id);
        } else if record.recovered {
            if let Some(id) = open_alert.take() {
                alerts.resolve_alert(id).await;
                info!(service = %name, alert_id = id, "Service recovered");
            }
        }
    }

    debug!(service = %name, "Monitoring loop exited");
}
