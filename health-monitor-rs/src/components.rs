//! Component checks feeding the health aggregator.
//!
//! Each check speaks its backend's own status vocabulary and maps it onto
//! [`HealthStatus`] in one place.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use error_handling::{Error, ErrorKind};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::status::{ComponentHealth, ComponentKind, HealthStatus};
use crate::tracker::LifecycleTracker;

/// A health check for one named component.
///
/// Returning `Err` is allowed; the aggregator turns it into an unhealthy
/// result for this component only.
#[async_trait]
pub trait ComponentCheck: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> ComponentKind;
    fn required(&self) -> bool;
    async fn check(&self) -> error_handling::Result<ComponentHealth>;
}

/// Reachability hook for a backing store.
#[async_trait]
pub trait Connection: Send + Sync {
    fn describe(&self) -> String;
    async fn ping(&self) -> error_handling::Result<()>;
    /// Re-establishes the connection. Must be safe to call repeatedly.
    async fn reconnect(&self) -> error_handling::Result<()>;
}

/// Connection check that opens a TCP socket to the backend.
pub struct TcpConnection {
    addr: String,
    timeout: Duration,
}

impl TcpConnection {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn describe(&self) -> String {
        self.addr.clone()
    }

    async fn ping(&self) -> error_handling::Result<()> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(Error::from(e)),
            Err(_) => Err(Error::new(
                ErrorKind::Timeout,
                format!("connect to {} timed out", self.addr),
            )
            .transient()),
        }
    }

    async fn reconnect(&self) -> error_handling::Result<()> {
        self.ping().await?;
        info!(addr = %self.addr, "Connection re-established");
        Ok(())
    }
}

async fn ping_component(
    name: &str,
    kind: ComponentKind,
    required: bool,
    conn: &dyn Connection,
) -> ComponentHealth {
    let start = Instant::now();
    let result = conn.ping().await;
    let elapsed = start.elapsed().as_secs_f64() * 1000.0;

    let health = match result {
        Ok(()) => ComponentHealth::new(name, kind, required, HealthStatus::Healthy),
        Err(e) => ComponentHealth::unhealthy(name, kind, required, e.to_string()),
    };
    health
        .with_response_time(elapsed)
        .with_detail("target", conn.describe())
}

/// Primary database reachability; required for readiness.
pub struct DatabaseCheck {
    conn: Arc<dyn Connection>,
}

impl DatabaseCheck {
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ComponentCheck for DatabaseCheck {
    fn name(&self) -> &str {
        "database"
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Database
    }

    fn required(&self) -> bool {
        true
    }

    async fn check(&self) -> error_handling::Result<ComponentHealth> {
        Ok(ping_component(self.name(), self.kind(), true, self.conn.as_ref()).await)
    }
}

/// Cache reachability. Optional: an outage only degrades the system.
pub struct CacheCheck {
    conn: Arc<dyn Connection>,
}

impl CacheCheck {
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ComponentCheck for CacheCheck {
    fn name(&self) -> &str {
        "cache"
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Cache
    }

    fn required(&self) -> bool {
        false
    }

    async fn check(&self) -> error_handling::Result<ComponentHealth> {
        Ok(ping_component(self.name(), self.kind(), false, self.conn.as_ref()).await)
    }
}

/// State of one log directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDirState {
    Ready,
    Missing,
    ReadOnly,
    NotADirectory,
}

impl LogDirState {
    pub fn inspect(path: &std::path::Path) -> Self {
        match std::fs::metadata(path) {
            Err(_) => LogDirState::Missing,
            Ok(meta) if !meta.is_dir() => LogDirState::NotADirectory,
            Ok(meta) if meta.permissions().readonly() => LogDirState::ReadOnly,
            Ok(_) => LogDirState::Ready,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            LogDirState::Ready => "ready",
            LogDirState::Missing => "missing",
            LogDirState::ReadOnly => "read_only",
            LogDirState::NotADirectory => "not_a_directory",
        }
    }
}

impl From<LogDirState> for HealthStatus {
    fn from(state: LogDirState) -> Self {
        match state {
            LogDirState::Ready => HealthStatus::Healthy,
            // Fixable by creating the directory.
            LogDirState::Missing => HealthStatus::Degraded,
            LogDirState::ReadOnly | LogDirState::NotADirectory => HealthStatus::Unhealthy,
        }
    }
}

/// Verifies the configured log directories exist and are writable.
pub struct LoggingCheck {
    dirs: Vec<PathBuf>,
}

impl LoggingCheck {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

#[async_trait]
impl ComponentCheck for LoggingCheck {
    fn name(&self) -> &str {
        "logging"
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Logging
    }

    fn required(&self) -> bool {
        true
    }

    async fn check(&self) -> error_handling::Result<ComponentHealth> {
        let mut status = HealthStatus::Healthy;
        let mut health = ComponentHealth::new(self.name(), self.kind(), true, status);
        let mut problems = Vec::new();

        for dir in &self.dirs {
            let state = LogDirState::inspect(dir);
            status = status.worst(state.into());
            if state != LogDirState::Ready {
                problems.push(format!("{} is {}", dir.display(), state.as_str()));
            }
            health = health.with_detail(&dir.display().to_string(), state.as_str());
        }

        health.status = status;
        if !problems.is_empty() {
            health = health.with_error(problems.join("; "));
        }
        Ok(health)
    }
}

/// Native status vocabulary of the vector store heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorStoreStatus {
    Healthy,
    Warning,
    Critical,
}

impl FromStr for VectorStoreStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "healthy" | "ok" => Ok(VectorStoreStatus::Healthy),
            "warning" | "slow" => Ok(VectorStoreStatus::Warning),
            "critical" | "error" => Ok(VectorStoreStatus::Critical),
            other => Err(Error::new(
                ErrorKind::Communication,
                format!("unrecognised vector store status '{}'", other),
            )),
        }
    }
}

impl From<VectorStoreStatus> for HealthStatus {
    fn from(status: VectorStoreStatus) -> Self {
        match status {
            VectorStoreStatus::Healthy => HealthStatus::Healthy,
            VectorStoreStatus::Warning => HealthStatus::Degraded,
            VectorStoreStatus::Critical => HealthStatus::Unhealthy,
        }
    }
}

/// Heartbeat reading from the vector store
#[derive(Debug, Clone)]
pub struct VectorStoreReport {
    pub status: VectorStoreStatus,
    pub latency_ms: f64,
    pub detail: Option<String>,
}

#[async_trait]
pub trait VectorStoreClient: Send + Sync {
    async fn heartbeat(&self) -> error_handling::Result<VectorStoreReport>;
}

/// Vector store reached over its HTTP heartbeat endpoint.
///
/// A 200 answer within `slow_after` is healthy, a slower 200 is a warning
/// and anything else is critical.
pub struct HttpVectorStore {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    slow_after: Duration,
}

impl HttpVectorStore {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
            slow_after: timeout / 2,
        }
    }
}

#[async_trait]
impl VectorStoreClient for HttpVectorStore {
    async fn heartbeat(&self) -> error_handling::Result<VectorStoreReport> {
        let start = Instant::now();
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await?;
        let elapsed = start.elapsed();
        let code = response.status();

        let status = if !code.is_success() {
            VectorStoreStatus::Critical
        } else if elapsed > self.slow_after {
            VectorStoreStatus::Warning
        } else {
            VectorStoreStatus::Healthy
        };

        Ok(VectorStoreReport {
            status,
            latency_ms: elapsed.as_secs_f64() * 1000.0,
            detail: (!code.is_success()).then(|| format!("heartbeat returned {}", code)),
        })
    }
}

pub struct VectorStoreCheck {
    client: Arc<dyn VectorStoreClient>,
}

impl VectorStoreCheck {
    pub fn new(client: Arc<dyn VectorStoreClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ComponentCheck for VectorStoreCheck {
    fn name(&self) -> &str {
        "vector_store"
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::VectorStore
    }

    fn required(&self) -> bool {
        false
    }

    async fn check(&self) -> error_handling::Result<ComponentHealth> {
        let report = self.client.heartbeat().await?;
        debug!(status = ?report.status, latency_ms = report.latency_ms, "Vector store heartbeat");

        let mut health = ComponentHealth::new(self.name(), self.kind(), false, report.status.into())
            .with_response_time(report.latency_ms);
        if let Some(detail) = report.detail {
            health = health.with_error(detail);
        }
        Ok(health)
    }
}

/// Reports a registered service through its tracked lifecycle state.
pub struct ServiceComponent {
    name: String,
    required: bool,
    tracker: Arc<LifecycleTracker>,
}

impl ServiceComponent {
    pub fn new(name: impl Into<String>, required: bool, tracker: Arc<LifecycleTracker>) -> Self {
        Self {
            name: name.into(),
            required,
            tracker,
        }
    }
}

#[async_trait]
impl ComponentCheck for ServiceComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Service
    }

    fn required(&self) -> bool {
        self.required
    }

    async fn check(&self) -> error_handling::Result<ComponentHealth> {
        let status = self.tracker.status(&self.name).await.ok_or_else(|| {
            Error::new(ErrorKind::Internal, format!("service '{}' is not tracked", self.name))
        })?;

        let mut health = ComponentHealth::new(
            self.name.clone(),
            ComponentKind::Service,
            self.required,
            status.state.into(),
        )
        .with_detail("state", status.state.as_str())
        .with_detail("consecutive_failures", status.consecutive_failures);

        if let Some(ms) = status.last_response_time_ms {
            health = health.with_response_time(ms);
        }
        if !health.status.is_healthy() {
            if let Some(error) = status.last_error {
                health = health.with_error(error);
            }
        }
        Ok(health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::HealthCheckResult;
    use tempfile::tempdir;
    use tokio::net::TcpListener;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_tcp_connection_ping() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let conn = Arc::new(TcpConnection::new(addr, Duration::from_secs(1)));

        let health = DatabaseCheck::new(conn).check().await.unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.response_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_cache_is_unhealthy_but_optional() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let check = CacheCheck::new(Arc::new(TcpConnection::new(addr, Duration::from_millis(200))));
        let health = check.check().await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(!health.required);
        assert_eq!(health.effective_status(), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_logging_check_states() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("app");
        std::fs::create_dir(&present).unwrap();
        let missing = dir.path().join("audit");

        let healthy = LoggingCheck::new(vec![present.clone()]).check().await.unwrap();
        assert_eq!(healthy.status, HealthStatus::Healthy);

        let degraded = LoggingCheck::new(vec![present, missing]).check().await.unwrap();
        assert_eq!(degraded.status, HealthStatus::Degraded);
        assert!(degraded.error.unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_logging_check_file_instead_of_dir() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("logs");
        std::fs::write(&file, b"not a dir").unwrap();

        let health = LoggingCheck::new(vec![file]).check().await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_vector_store_vocabulary() {
        let parse = |s: &str| HealthStatus::from(s.parse::<VectorStoreStatus>().unwrap());
        assert_eq!(parse("OK"), HealthStatus::Healthy);
        assert_eq!(parse("warning"), HealthStatus::Degraded);
        assert_eq!(parse("critical"), HealthStatus::Unhealthy);
        assert!("sideways".parse::<VectorStoreStatus>().is_err());
    }

    #[tokio::test]
    async fn test_http_vector_store_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = HttpVectorStore::new(reqwest::Client::new(), server.uri(), Duration::from_secs(2));
        let health = VectorStoreCheck::new(Arc::new(store)).check().await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(health.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_service_component_follows_tracker() {
        let tracker = Arc::new(LifecycleTracker::default());
        tracker.track("docusign", false).await;
        let component = ServiceComponent::new("docusign", false, tracker.clone());

        assert_eq!(component.check().await.unwrap().status, HealthStatus::Unknown);

        tracker.mark_starting("docusign").await.unwrap();
        tracker.mark_running("docusign").await.unwrap();
        tracker
            .record_probe("docusign", &HealthCheckResult::from_status(500, 3.0))
            .await
            .unwrap();

        let health = component.check().await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.details["consecutive_failures"], 1);
        assert!(health.error.is_some());
    }

    #[tokio::test]
    async fn test_untracked_service_is_error() {
        let component = ServiceComponent::new("ghost", true, Arc::new(LifecycleTracker::default()));
        assert!(component.check().await.is_err());
    }
}
