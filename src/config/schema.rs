//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.
//! Routes are not configured here directly: they come from providers, and
//! `providers.static_services` feeds the built-in `static` provider.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::provider::RawServiceDescriptor;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Provider configuration and inline services.
    pub providers: ProvidersConfig,

    /// Drain and shutdown windows.
    pub lifecycle: LifecycleConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Providers feeding the route table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Quiet window before a burst of provider events triggers a rebuild.
    pub debounce_ms: u64,

    /// Watched service files.
    pub file: Vec<FileProviderConfig>,

    /// Services declared inline, served by the `static` provider.
    pub static_services: Vec<RawServiceDescriptor>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            file: Vec::new(),
            static_services: Vec::new(),
        }
    }
}

impl ProvidersConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// One watched services file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileProviderConfig {
    /// Provider id, used to qualify route names.
    pub name: String,

    /// Path to the TOML file of `[[services]]`.
    pub path: String,

    /// Poll interval for the watcher backend in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    2
}

/// Drain windows.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long a superseded generation may finish in-flight requests.
    pub drain_grace_secs: u64,

    /// How long shutdown waits for in-flight requests.
    pub shutdown_grace_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            drain_grace_secs: 30,
            shutdown_grace_secs: 30,
        }
    }
}

impl LifecycleConfig {
    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Idle upstream connection timeout in seconds.
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            idle_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.providers.debounce(), Duration::from_millis(200));
        assert_eq!(config.lifecycle.drain_grace(), Duration::from_secs(30));
        assert!(!config.admin.enabled);
    }

    #[test]
    fn test_full_config_parses() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:8000"

            [providers]
            debounce_ms = 50

            [[providers.file]]
            name = "services"
            path = "/etc/proxy/services.toml"

            [[providers.static_services]]
            name = "stats"
            rule = "PathPrefix:/stat"

            [[providers.static_services.endpoints]]
            address = "http://127.0.0.1:3000"
            weight = 2

            [[providers.static_services.middlewares]]
            kind = "strip-prefix"
            options = { prefixes = "/stat/, /" }

            [lifecycle]
            drain_grace_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.providers.file[0].poll_interval_secs, 2);
        let svc = &config.providers.static_services[0];
        assert_eq!(svc.endpoints[0].weight, 2);
        assert_eq!(svc.middlewares[0].options["prefixes"], "/stat/, /");
        assert_eq!(config.lifecycle.shutdown_grace_secs, 30);
    }
}
