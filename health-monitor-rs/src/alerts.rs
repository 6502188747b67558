//! In-memory alert log with pluggable delivery.
//!
//! Alerts live in a bounded ring buffer; once full the oldest entry is
//! dropped. Delivery to sinks is best effort and never fails the caller.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

pub const DEFAULT_ALERT_CAPACITY: usize = 1000;
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: u64,
    pub message: String,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
    pub context: BTreeMap<String, Value>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Change notification handed to sinks
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlertEvent {
    Created(Alert),
    Resolved(Alert),
}

/// Delivery channel for alert events, e.g. WebSocket push or a pager.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, event: &AlertEvent) -> error_handling::Result<()>;
}

/// Fans events out to in-process subscribers such as the WebSocket
/// notification hub.
pub struct BroadcastSink {
    sender: broadcast::Sender<AlertEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl AlertSink for BroadcastSink {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn deliver(&self, event: &AlertEvent) -> error_handling::Result<()> {
        // No subscribers is not an error.
        if self.sender.send(event.clone()).is_err() {
            debug!("No alert subscribers connected");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertSummary {
    pub window_hours: f64,
    pub total_alerts: usize,
    pub active_alerts: usize,
    pub resolved_alerts: usize,
    pub by_severity: BTreeMap<AlertSeverity, usize>,
    pub alerts_per_hour: f64,
    pub generated_at: DateTime<Utc>,
}

pub struct AlertManager {
    capacity: usize,
    next_id: AtomicU64,
    alerts: Mutex<VecDeque<Alert>>,
    sinks: Vec<Arc<dyn AlertSink>>,
    delivery_timeout: Duration,
}

impl AlertManager {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            next_id: AtomicU64::new(1),
            alerts: Mutex::new(VecDeque::with_capacity(capacity)),
            sinks: Vec::new(),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    /// Upper bound on a single sink delivery
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn create_alert(
        &self,
        message: impl Into<String>,
        severity: AlertSeverity,
        context: BTreeMap<String, Value>,
    ) -> Alert {
        let alert = Alert {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            message: message.into(),
            severity,
            timestamp: Utc::now(),
            context,
            resolved: false,
            resolved_at: None,
        };

        match severity {
            AlertSeverity::Low => info!(alert_id = alert.id, severity = %severity, context = ?alert.context, "{}", alert.message),
            AlertSeverity::Medium => warn!(alert_id = alert.id, severity = %severity, context = ?alert.context, "{}", alert.message),
            AlertSeverity::High | AlertSeverity::Critical => {
                error!(alert_id = alert.id, severity = %severity, context = ?alert.context, "{}", alert.message)
            }
        }

        let len = {
            let mut alerts = self.alerts.lock().await;
            while alerts.len() >= self.capacity {
                alerts.pop_front();
            }
            alerts.push_back(alert.clone());
            alerts.len()
        };

        counter!("health.alerts_created", 1, "severity" => severity.as_str());
        gauge!("health.alerts_buffered", len as f64);

        self.notify(AlertEvent::Created(alert.clone())).await;
        alert
    }

    /// Marks an alert resolved. Returns `false` if the id is unknown or was
    /// already evicted.
    pub async fn resolve_alert(&self, id: u64) -> bool {
        let resolved = {
            let mut alerts = self.alerts.lock().await;
            match alerts.iter_mut().find(|a| a.id == id) {
                Some(alert) if !alert.resolved => {
                    alert.resolved = true;
                    alert.resolved_at = Some(Utc::now());
                    Some(alert.clone())
                }
                Some(_) => return true,
                None => None,
            }
        };

        match resolved {
            Some(alert) => {
                info!(alert_id = id, severity = %alert.severity, "Alert resolved");
                counter!("health.alerts_resolved", 1, "severity" => alert.severity.as_str());
                self.notify(AlertEvent::Resolved(alert)).await;
                true
            }
            None => {
                debug!(alert_id = id, "Alert not found");
                false
            }
        }
    }

    /// Unresolved alerts, oldest first
    pub async fn get_active_alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .await
            .iter()
            .filter(|a| !a.resolved)
            .cloned()
            .collect()
    }

    /// The most recent alerts, newest first
    pub async fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts
            .lock()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.alerts.lock().await.len()
    }

    pub async fn get_alert_summary(&self, window: Duration) -> AlertSummary {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| now.checked_sub_signed(w));

        let alerts = self.alerts.lock().await;
        let in_window: Vec<&Alert> = alerts
            .iter()
            .filter(|a| cutoff.map_or(true, |c| a.timestamp >= c))
            .collect();

        let mut by_severity = BTreeMap::new();
        for alert in &in_window {
            *by_severity.entry(alert.severity).or_insert(0) += 1;
        }

        let total = in_window.len();
        let active = in_window.iter().filter(|a| !a.resolved).count();
        let window_hours = window.as_secs_f64() / 3600.0;

        AlertSummary {
            window_hours,
            total_alerts: total,
            active_alerts: active,
            resolved_alerts: total - active,
            by_severity,
            alerts_per_hour: if window_hours > 0.0 {
                total as f64 / window_hours
            } else {
                0.0
            },
            generated_at: now,
        }
    }

    async fn notify(&self, event: AlertEvent) {
        for sink in &self.sinks {
            let error = match tokio::time::timeout(self.delivery_timeout, sink.deliver(&event)).await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "delivery timed out after {}ms",
                    self.delivery_timeout.as_millis()
                ),
            };
            warn!(sink = sink.name(), error = %error, "Failed to deliver alert");
            counter!("health.alert_delivery_failures", 1, "sink" => sink.name().to_string());
        }
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_CAPACITY)
    }
}
