//! config-rs/lib.rs
//! Configuration for the health monitor: layered settings (defaults, TOML
//! file, `HEALTH_*` environment variables) and bind address helpers.

use std::env;
use std::net::SocketAddr;

pub mod settings;

pub use settings::{
    AgentSettings, AlertSettings, AutomationSettings, ComponentSettings, LogSettings,
    MonitoringSettings, ServerSettings, ServiceSettings, Settings, StartupSettings,
};
pub use config::ConfigError;

/// Get service port from environment variables with proper fallback
///
/// Reads `<SERVICE>_SERVICE_PORT`; an unparseable value falls back to the
/// default with a warning.
pub fn get_service_port(service_name: &str, default_port: u16) -> u16 {
    let var_name = format!("{}_SERVICE_PORT", env_key(service_name));
    match env::var(&var_name) {
        Ok(value) => value.parse::<u16>().unwrap_or_else(|_| {
            tracing::warn!(var = %var_name, default_port, "Invalid port, using default");
            default_port
        }),
        Err(_) => default_port,
    }
}

/// Create a SocketAddr for binding a service
///
/// `<SERVICE>_SERVICE_ADDR` may hold a full `host:port` (optionally with an
/// `http://` scheme); otherwise `0.0.0.0` and the resolved port are used.
pub fn get_bind_address(service_name: &str, default_port: u16) -> SocketAddr {
    let var_name = format!("{}_SERVICE_ADDR", env_key(service_name));

    if let Ok(addr_str) = env::var(&var_name) {
        if let Some(addr) = parse_socket_addr(&addr_str) {
            return addr;
        }
        tracing::warn!(var = %var_name, value = %addr_str, "Invalid address format, using default");
    }

    let port = get_service_port(service_name, default_port);
    SocketAddr::from(([0, 0, 0, 0], port))
}

/// Parses `host:port`, tolerating an `http://` or `https://` prefix
pub fn parse_socket_addr(value: &str) -> Option<SocketAddr> {
    let trimmed = value
        .strip_prefix("http://")
        .or_else(|| value.strip_prefix("https://"))
        .unwrap_or(value)
        .trim_end_matches('/');
    trimmed.parse::<SocketAddr>().ok()
}

fn env_key(service_name: &str) -> String {
    service_name.to_uppercase().replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_service_port() {
        std::env::set_var("PORTTEST_SERVICE_PORT", "9000");
        assert_eq!(get_service_port("porttest", 8000), 9000);

        std::env::set_var("BADPORT_SERVICE_PORT", "not-a-port");
        assert_eq!(get_service_port("badport", 8000), 8000);

        assert_eq!(get_service_port("UNSET_PORT_SERVICE", 8000), 8000);
    }

    #[test]
    fn test_get_bind_address() {
        std::env::set_var("ADDRTEST_SERVICE_ADDR", "http://127.0.0.1:9100");
        assert_eq!(
            get_bind_address("addrtest", 8000),
            "127.0.0.1:9100".parse().unwrap()
        );

        assert_eq!(
            get_bind_address("health-monitor-unset", 8000),
            "0.0.0.0:8000".parse().unwrap()
        );
    }

    #[test]
    fn test_parse_socket_addr() {
        assert_eq!(parse_socket_addr("10.0.0.5:5432"), Some("10.0.0.5:5432".parse().unwrap()));
        assert_eq!(parse_socket_addr("https://10.0.0.5:443/"), Some("10.0.0.5:443".parse().unwrap()));
        assert_eq!(parse_socket_addr("db.internal"), None);
    }
}
