//! Telemetry configuration from environment variables.

use std::env;

/// Default service name on every log line.
pub const DEFAULT_SERVICE_NAME: &str = "mhs-gateway";

/// Configuration for log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name for logs
    pub service_name: String,

    /// Log filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` expression)
    pub log_level: String,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,

    /// Deployment environment (`NODE_ENV`)
    pub environment: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            environment: "dev".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OTEL_SERVICE_NAME`: Service name (default: mhs-gateway)
    /// - `MHS_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `MHS_JSON_LOGS`: Enable JSON logs (default: true in containers)
    /// - `NODE_ENV`: Deployment environment (default: dev)
    pub fn from_env() -> Self {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key-value source.
    pub fn from_source<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let is_container =
            get("KUBERNETES_SERVICE_HOST").is_some() || get("DOCKER_CONTAINER").is_some();

        Self {
            service_name: get("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),

            log_level: get("MHS_LOG_LEVEL")
                .or_else(|| get("RUST_LOG"))
                .unwrap_or(defaults.log_level),

            json_logs: get("MHS_JSON_LOGS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(is_container),

            environment: get("NODE_ENV").unwrap_or(defaults.environment),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::from_source(source(&[]));
        assert_eq!(config, TelemetryConfig::default());
        assert_eq!(config.service_name, "mhs-gateway");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_log_level_precedence() {
        let config = TelemetryConfig::from_source(source(&[
            ("MHS_LOG_LEVEL", "debug"),
            ("RUST_LOG", "warn"),
        ]));
        assert_eq!(config.log_level, "debug");

        let config = TelemetryConfig::from_source(source(&[("RUST_LOG", "warn")]));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_json_logs() {
        assert!(TelemetryConfig::from_source(source(&[("MHS_JSON_LOGS", "TRUE")])).json_logs);
        assert!(TelemetryConfig::from_source(source(&[("MHS_JSON_LOGS", "1")])).json_logs);
        assert!(!TelemetryConfig::from_source(source(&[("MHS_JSON_LOGS", "no")])).json_logs);
        // Containers default to JSON
        assert!(TelemetryConfig::from_source(source(&[("DOCKER_CONTAINER", "1")])).json_logs);
    }
}
