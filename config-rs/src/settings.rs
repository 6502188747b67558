//! Layered settings for the health monitor.
//!
//! Precedence, lowest first: built-in defaults, an optional TOML file, and
//! environment variables such as `HEALTH_AUTOMATION__INTERVAL_SECS=30`.

use std::env;
use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Default location of the settings file
pub const DEFAULT_CONFIG_FILE: &str = "config/health.toml";

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "HEALTH";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LogSettings,
    pub startup: StartupSettings,
    pub monitoring: MonitoringSettings,
    pub alerts: AlertSettings,
    pub automation: AutomationSettings,
    pub components: ComponentSettings,
    /// Environment variables that must be set for `/health` to report healthy
    pub required_env: Vec<String>,
    pub services: Vec<ServiceSettings>,
    pub agents: AgentSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub service_name: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            service_name: "health-monitor".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_dir: None,
        }
    }
}

/// Bring-up timings used by the startup orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupSettings {
    /// Interval between health probes while a service is starting
    pub poll_interval_ms: u64,
    /// Wait applied to services without a health check target
    pub grace_period_ms: u64,
    /// Interval between dependency readiness checks
    pub dependency_poll_interval_ms: u64,
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            grace_period_ms: 2_000,
            dependency_poll_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    /// Interval between probes once a service is up
    pub interval_secs: u64,
    /// Consecutive failures before a service is considered unhealthy
    pub unhealthy_after: u32,
    /// Consecutive failures before an alert is raised
    pub alert_threshold: u32,
    /// Number of recent probe errors kept per service
    pub error_history: usize,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            unhealthy_after: 1,
            alert_threshold: 3,
            error_history: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub capacity: usize,
    pub summary_window_hours: u64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            summary_window_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub history_capacity: usize,
    /// Log directories the automation keeps in place
    pub log_dirs: Vec<PathBuf>,
    /// Attempts per reconnect remediation
    pub remediation_attempts: usize,
    /// First backoff delay between reconnect attempts
    pub remediation_backoff_ms: u64,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            history_capacity: 100,
            log_dirs: vec![PathBuf::from("logs")],
            remediation_attempts: 3,
            remediation_backoff_ms: 500,
        }
    }
}

/// Addresses of the infrastructure components checked by the aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentSettings {
    /// `host:port` of the database
    pub database_addr: Option<String>,
    /// `host:port` of the cache; the cache is optional
    pub cache_addr: Option<String>,
    /// Heartbeat URL of the vector store
    pub vector_store_url: Option<String>,
    pub probe_timeout_secs: u64,
}

impl Default for ComponentSettings {
    fn default() -> Self {
        Self {
            database_addr: None,
            cache_addr: None,
            vector_store_url: None,
            probe_timeout_secs: 5,
        }
    }
}

/// One service declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub name: String,
    pub required: bool,
    pub health_check_url: Option<String>,
    pub health_check_timeout_secs: u64,
    pub startup_timeout_secs: u64,
    pub depends_on: Vec<String>,
    pub description: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            required: true,
            health_check_url: None,
            health_check_timeout_secs: 5,
            startup_timeout_secs: 60,
            depends_on: Vec::new(),
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub names: Vec<String>,
    /// Seconds without heartbeat before an agent is considered stalled
    pub stale_after_secs: u64,
    /// Consecutive task failures before an agent is considered failed
    pub failure_threshold: u32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            names: Vec::new(),
            stale_after_secs: 300,
            failure_threshold: 3,
        }
    }
}

impl Settings {
    /// Loads `.env`, then the file named by `HEALTH_CONFIG_FILE` (or the
    /// default path, if present), then `HEALTH_*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let path = env::var("HEALTH_CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_sources(Some(Path::new(&path)), ENV_PREFIX)
    }

    /// Builds settings from an optional TOML file and environment variables
    /// with the given prefix. A missing file is not an error.
    pub fn from_sources(file: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("required_env")
                .with_list_parse_key("agents.names")
                .with_list_parse_key("automation.log_dirs")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;

        tracing::debug!(
            services = settings.services.len(),
            required_env = settings.required_env.len(),
            "Settings loaded"
        );

        Ok(settings)
    }

    /// Parses settings from a TOML string, without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Required environment variables that are unset or empty
    pub fn missing_required_env(&self) -> Vec<String> {
        self.required_env
            .iter()
            .filter(|name| env::var(name.as_str()).map(|v| v.trim().is_empty()).unwrap_or(true))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        required_env = ["DATABASE_URL"]

        [automation]
        interval_secs = 15
        log_dirs = ["logs", "logs/jobs"]

        [[services]]
        name = "database"
        health_check_url = "http://localhost:5432/health"

        [[services]]
        name = "api"
        required = false
        depends_on = ["database"]
        startup_timeout_secs = 10
    "#;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.alerts.capacity, 1_000);
        assert_eq!(settings.automation.history_capacity, 100);
        assert_eq!(settings.monitoring.alert_threshold, 3);
        assert_eq!(settings.startup.poll_interval_ms, 5_000);
        assert_eq!(settings.startup.grace_period_ms, 2_000);
        assert!(settings.services.is_empty());
    }

    #[test]
    fn test_from_toml_str() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();

        assert_eq!(settings.automation.interval_secs, 15);
        assert!(settings.automation.enabled);
        assert_eq!(settings.automation.log_dirs.len(), 2);
        assert_eq!(settings.services.len(), 2);

        let db = &settings.services[0];
        assert!(db.required);
        assert_eq!(db.health_check_timeout_secs, 5);

        let api = &settings.services[1];
        assert!(!api.required);
        assert_eq!(api.depends_on, vec!["database".to_string()]);
        assert_eq!(api.startup_timeout_secs, 10);
    }

    #[test]
    fn test_file_and_env_layering() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        std::env::set_var("CFGLAYER_AUTOMATION__INTERVAL_SECS", "45");
        std::env::set_var("CFGLAYER_REQUIRED_ENV", "DATABASE_URL,SECRET_KEY");

        let settings = Settings::from_sources(Some(file.path()), "CFGLAYER").unwrap();
        assert_eq!(settings.automation.interval_secs, 45);
        assert_eq!(settings.required_env, vec!["DATABASE_URL".to_string(), "SECRET_KEY".to_string()]);
        assert_eq!(settings.services.len(), 2);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let settings = Settings::from_sources(Some(Path::new("/nonexistent/health.toml")), "CFGMISSING").unwrap();
        assert!(settings.services.is_empty());
    }

    #[test]
    fn test_missing_required_env() {
        std::env::set_var("CFGTEST_PRESENT_VAR", "value");
        std::env::set_var("CFGTEST_EMPTY_VAR", "  ");

        let settings = Settings {
            required_env: vec![
                "CFGTEST_PRESENT_VAR".to_string(),
                "CFGTEST_EMPTY_VAR".to_string(),
                "CFGTEST_ABSENT_VAR".to_string(),
            ],
            ..Default::default()
        };

        assert_eq!(
            settings.missing_required_env(),
            vec!["CFGTEST_EMPTY_VAR".to_string(), "CFGTEST_ABSENT_VAR".to_string()]
        );
    }
}
