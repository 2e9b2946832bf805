//! Gateway configuration with validation.
//!
//! Built once at start-up from a key-value source (normally the process
//! environment) and handed to every component by value.

use mhs_broker::{BrokerEndpoint, FailoverPolicy, StompOptions};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// `NODE_ENV` value that swaps the broker for an in-process one.
pub const LOCAL_ENV: &str = "local";

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Deployment environment (`NODE_ENV`)
    pub node_env: String,
    /// HTTP server configuration
    pub http: HttpConfig,
    /// Broker connection and queue names
    pub broker: BrokerConfig,
    /// Reconnect policy
    pub failover: FailoverConfig,
    /// Timeout configuration
    pub timeouts: TimeoutConfig,
    /// API authorization keys
    pub auth: AuthConfig,
    /// ASIDs and ODS codes stamped on outbound messages
    pub identity: IdentityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            node_env: "dev".to_string(),
            http: HttpConfig::default(),
            broker: BrokerConfig::default(),
            failover: FailoverConfig::default(),
            timeouts: TimeoutConfig::default(),
            auth: AuthConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key-value source.
    ///
    /// Unset or blank keys keep their defaults.
    pub fn from_source<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| {
            get(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();

        if let Some(env) = lookup("NODE_ENV") {
            config.node_env = env;
        }
        if let Some(port) = lookup("HTTP_PORT") {
            config.http.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("HTTP_PORT '{port}' is not a port")))?;
        }

        let urls: Vec<String> = ["MHS_QUEUE_URL_1", "MHS_QUEUE_URL_2"]
            .iter()
            .filter_map(|&key| lookup(key))
            .collect();
        if !urls.is_empty() {
            config.broker.urls = urls;
        }
        if let Some(name) = lookup("MHS_QUEUE_NAME") {
            config.broker.queue_name = name;
        }
        if let Some(name) = lookup("MHS_DLQ_NAME") {
            config.broker.dlq_name = name;
        }
        if let Some(name) = lookup("MHS_OUTBOUND_QUEUE_NAME") {
            config.broker.outbound_queue_name = name;
        }
        config.broker.virtual_host = lookup("MHS_STOMP_VIRTUAL_HOST");
        config.broker.username = lookup("MHS_QUEUE_USERNAME");
        config.broker.password = lookup("MHS_QUEUE_PASSWORD");

        if let Some(timeout) = lookup("MHS_RESPONSE_TIMEOUT") {
            config.timeouts.mhs_response = humantime_serde::parse_duration(&timeout)
                .map_err(|e| ConfigError::InvalidTimeout(format!("MHS_RESPONSE_TIMEOUT: {e}")))?;
        }

        if let Some(keys) = lookup("AUTHORIZATION_KEYS") {
            config.auth.keys = keys
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.identity = IdentityConfig {
            deductions_asid: lookup("DEDUCTIONS_ASID").unwrap_or_default(),
            deductions_ods_code: lookup("DEDUCTIONS_ODS_CODE").unwrap_or_default(),
            pds_asid: lookup("PDS_ASID").unwrap_or_default(),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoints()?;

        for (key, name) in [
            ("queue_name", &self.broker.queue_name),
            ("dlq_name", &self.broker.dlq_name),
            ("outbound_queue_name", &self.broker.outbound_queue_name),
        ] {
            if name.is_empty() {
                return Err(ConfigError::Invalid(format!("{key} cannot be empty")));
            }
        }

        if self.broker.queue_name == self.broker.outbound_queue_name {
            return Err(ConfigError::Invalid(
                "inbound and outbound queues must differ".into(),
            ));
        }

        // Validate timeouts
        for (key, value) in [
            ("request", self.timeouts.request),
            ("mhs_response", self.timeouts.mhs_response),
            ("cleanup_interval", self.timeouts.cleanup_interval),
            ("connect", self.broker.connect_timeout),
            ("receipt", self.broker.receipt_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidTimeout(format!(
                    "{key} timeout cannot be 0"
                )));
            }
        }

        // The reply wait has to end before the HTTP request times out
        if self.timeouts.mhs_response >= self.timeouts.request {
            return Err(ConfigError::InvalidTimeout(format!(
                "mhs_response ({}ms) must be shorter than request ({}ms)",
                self.timeouts.mhs_response.as_millis(),
                self.timeouts.request.as_millis()
            )));
        }

        Ok(())
    }

    /// Whether the in-process broker and simulated MHS should be used.
    pub fn is_local(&self) -> bool {
        self.node_env == LOCAL_ENV
    }

    /// Parsed broker endpoints, in failover order.
    pub fn endpoints(&self) -> Result<Vec<BrokerEndpoint>, ConfigError> {
        if self.broker.urls.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one broker URL is required".into(),
            ));
        }
        self.broker
            .urls
            .iter()
            .map(|url| {
                url.parse::<BrokerEndpoint>()
                    .map_err(|e| ConfigError::InvalidEndpoint(e.to_string()))
            })
            .collect()
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }

    pub fn failover_policy(&self) -> FailoverPolicy {
        FailoverPolicy {
            max_reconnects: self.failover.max_reconnects,
            reconnect_delay: self.failover.reconnect_delay,
        }
    }

    /// `CONNECT` options for the STOMP connector.
    pub fn stomp_options(&self) -> StompOptions {
        StompOptions {
            virtual_host: self.broker.virtual_host.clone(),
            login: self.broker.username.clone(),
            passcode: self.broker.password.clone(),
            connect_timeout: self.broker.connect_timeout,
            receipt_timeout: self.broker.receipt_timeout,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 3000)
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 3000,
        }
    }
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Endpoint URLs (`tcp://host:port`), primary first
    pub urls: Vec<String>,
    /// STOMP `host` header
    pub virtual_host: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Queue the MHS delivers inbound messages to
    pub queue_name: String,
    /// Dead-letter queue for messages that are never acknowledged
    pub dlq_name: String,
    /// Queue the MHS consumes requests from
    pub outbound_queue_name: String,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub receipt_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            urls: vec!["tcp://localhost:61613".to_string()],
            virtual_host: None,
            username: None,
            password: None,
            queue_name: "gp2gp-inbound".to_string(),
            dlq_name: "DLQ.gp2gp-inbound".to_string(),
            outbound_queue_name: "gp2gp-outbound".to_string(),
            connect_timeout: Duration::from_secs(5),
            receipt_timeout: Duration::from_secs(10),
        }
    }
}

/// Bounded reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Attempts after the first failure
    pub max_reconnects: u32,
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        let policy = FailoverPolicy::default();
        Self {
            max_reconnects: policy.max_reconnects,
            reconnect_delay: policy.reconnect_delay,
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole HTTP request
    #[serde(with = "humantime_serde")]
    pub request: Duration,
    /// Wait for a correlated MHS reply
    #[serde(with = "humantime_serde")]
    pub mhs_response: Duration,
    /// Sweep period for expired pending replies
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            mhs_response: Duration::from_secs(25),
            cleanup_interval: Duration::from_secs(5),
        }
    }
}

/// Authorization configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accepted `Authorization` header values
    #[serde(skip_serializing)]
    pub keys: Vec<String>,
}

/// Identities stamped on outbound messages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub deductions_asid: String,
    pub deductions_ods_code: String,
    pub pds_asid: String,
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Broker URL that cannot be used
    #[error("invalid broker endpoint: {0}")]
    InvalidEndpoint(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .ok()
                .and_then(|m| m.checked_mul(60))
                .map(Duration::from_secs)
                .ok_or("invalid minutes")
        } else {
            // Plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
