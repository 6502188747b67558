//! Single-shot health probes.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use error_handling::{Error, ErrorKind};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::debug;

use crate::registry::ServiceDescriptor;

/// Outcome class of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeClass {
    Healthy,
    /// The target answered with something other than 200
    Unhealthy,
    /// No answer: connection failure or timeout
    Error,
}

impl ProbeClass {
    fn as_str(&self) -> &'static str {
        match self {
            ProbeClass::Healthy => "healthy",
            ProbeClass::Unhealthy => "unhealthy",
            ProbeClass::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: f64,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HealthCheckResult {
    /// Result for services without a health check target
    pub fn assumed_healthy() -> Self {
        Self {
            healthy: true,
            status_code: None,
            response_time_ms: 0.0,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn from_status(status_code: u16, response_time_ms: f64) -> Self {
        let healthy = status_code == 200;
        Self {
            healthy,
            status_code: Some(status_code),
            response_time_ms,
            error: (!healthy).then(|| format!("health check returned status {}", status_code)),
            timestamp: Utc::now(),
        }
    }

    pub fn from_error(error: impl Into<String>, response_time_ms: f64) -> Self {
        Self {
            healthy: false,
            status_code: None,
            response_time_ms,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn class(&self) -> ProbeClass {
        match (self.healthy, self.status_code) {
            (true, _) => ProbeClass::Healthy,
            (false, Some(_)) => ProbeClass::Unhealthy,
            (false, None) => ProbeClass::Error,
        }
    }
}

/// Performs one health check against a service.
///
/// Implementations never fail: every failure mode is reported through the
/// returned [`HealthCheckResult`]. Retrying is left to the caller.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, descriptor: &ServiceDescriptor) -> HealthCheckResult;
}

/// HTTP GET prober; only a 200 response counts as healthy.
#[derive(Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> error_handling::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                Error::new(ErrorKind::Initialization, "Failed to build probe HTTP client").cause(e)
            })?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, descriptor: &ServiceDescriptor) -> HealthCheckResult {
        let Some(target) = descriptor.health_check_target.as_deref() else {
            return HealthCheckResult::assumed_healthy();
        };

        let timeout = descriptor.health_check_timeout;
        let start = Instant::now();
        let request = self.client.get(target).timeout(timeout).send();

        // The outer timeout also bounds DNS resolution and connection setup.
        let result = match tokio::time::timeout(timeout, request).await {
            Ok(Ok(response)) => HealthCheckResult::from_status(
                response.status().as_u16(),
                elapsed_ms(start),
            ),
            Ok(Err(e)) => {
                let message = if e.is_timeout() {
                    format!("health check timed out after {}ms", timeout.as_millis())
                } else {
                    Error::from(e).to_string()
                };
                HealthCheckResult::from_error(message, elapsed_ms(start))
            }
            Err(_) => HealthCheckResult::from_error(
                format!("health check timed out after {}ms", timeout.as_millis()),
                elapsed_ms(start),
            ),
        };

        let class = result.class();
        debug!(
            service = %descriptor.name,
            target = %target,
            outcome = class.as_str(),
            status_code = ?result.status_code,
            response_time_ms = result.response_time_ms,
            "Health probe completed"
        );
        counter!(
            "health.probes",
            1,
            "service" => descriptor.name.clone(),
            "outcome" => class.as_str()
        );
        histogram!(
            "health.probe_latency_ms",
            result.response_time_ms,
            "service" => descriptor.name.clone()
        );

        result
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
