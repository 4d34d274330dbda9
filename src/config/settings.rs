use std::env;
use std::net::IpAddr;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub shutdown: ShutdownSettings,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

/// Public listener (WebSocket subscribers + operational endpoints)
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins; empty means any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Internal producer listener
#[derive(Debug, Clone, Deserialize)]
pub struct IngressConfig {
    #[serde(default = "default_ingress_host")]
    pub host: String,
    #[serde(default = "default_ingress_port")]
    pub port: u16,
    /// Deadline for a producer to write its payload and close
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Payloads above this size are dropped
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Capacity of the queue between ingress and the broadcaster
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Heartbeat interval in seconds (server sends ping)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Connection timeout in seconds (disconnect if no activity)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Cleanup task interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Frames buffered per connection before it counts as a failed write
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownSettings {
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    /// Upper bound for one fire-and-forget publish attempt
    #[serde(default = "default_producer_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_ingress_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ingress_port() -> u16 {
    8081
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_max_payload_bytes() -> usize {
    64 * 1024
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_connection_timeout() -> u64 {
    120 // 2 minutes
}

fn default_cleanup_interval() -> u64 {
    60 // 1 minute
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

fn default_producer_timeout_ms() -> u64 {
    1000
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "rfq-event-hub".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8082)?
            .set_default("ingress.host", "127.0.0.1")?
            .set_default("ingress.port", 8081)?
            .set_default("ingress.read_timeout_ms", 1000)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // HUB_SERVER__PORT, HUB_INGRESS__READ_TIMEOUT_MS, HUB_OTEL__ENABLED, ...
            .add_source(
                Environment::with_prefix("HUB")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn ingress_addr(&self) -> String {
        format!("{}:{}", self.ingress.host, self.ingress.port)
    }
}

impl IngressConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Whether the configured host keeps the trust boundary on this machine.
    pub fn is_loopback(&self) -> bool {
        if self.host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        self.host
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }
}

impl ShutdownSettings {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl ProducerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            host: default_ingress_host(),
            port: default_ingress_port(),
            read_timeout_ms: default_read_timeout_ms(),
            max_payload_bytes: default_max_payload_bytes(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            connection_timeout: default_connection_timeout(),
            cleanup_interval: default_cleanup_interval(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_producer_timeout_ms(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
