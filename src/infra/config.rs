//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., "depot-north", "terminal-2")
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "faregate".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// HTTP API bind address
    #[serde(default = "default_api_bind_address")]
    pub bind_address: String,
    /// HTTP API port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind_address: default_api_bind_address(), port: default_api_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// National dialing country code, without "+"
    #[serde(default = "default_country_code")]
    pub country_code: String,
    /// Digit count of a bare national subscriber number
    #[serde(default = "default_local_number_len")]
    pub local_number_len: usize,
}

fn default_country_code() -> String {
    "228".to_string()
}

fn default_local_number_len() -> usize {
    8
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { country_code: default_country_code(), local_number_len: default_local_number_len() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    /// Optional JSONL ticket manifest loaded at startup
    #[serde(default)]
    pub seed_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Per-subscriber backlog bound
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Heartbeat frame interval (seconds)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Subscribers not draining for this long are disconnected (seconds)
    #[serde(default = "default_client_timeout")]
    pub client_timeout_secs: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            client_timeout_secs: default_client_timeout(),
        }
    }
}

fn default_queue_capacity() -> usize {
    64
}

fn default_heartbeat_interval() -> u64 {
    15
}

fn default_client_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// File path for the validation audit log (JSONL format)
    #[serde(default = "default_audit_file")]
    pub file: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { file: default_audit_file() }
    }
}

fn default_audit_file() -> String {
    "validations.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { bind_address: default_broker_bind_address(), port: default_mqtt_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Topic for validation outcomes (QoS 1)
    #[serde(default = "default_validations_topic")]
    pub validations_topic: String,
    /// Topic for periodic metrics snapshots (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
    /// Topic for subscriber lifecycle events (QoS 0)
    #[serde(default = "default_subscribers_topic")]
    pub subscribers_topic: String,
    /// Interval for publishing metrics (seconds)
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_validations_topic() -> String {
    "faregate/validations".to_string()
}

fn default_metrics_topic() -> String {
    "faregate/metrics".to_string()
}

fn default_subscribers_topic() -> String {
    "faregate/subscribers".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    5
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            validations_topic: default_validations_topic(),
            metrics_topic: default_metrics_topic(),
            subscribers_topic: default_subscribers_topic(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    api_bind_address: String,
    api_port: u16,
    country_code: String,
    local_number_len: usize,
    store_seed_file: Option<String>,
    queue_capacity: usize,
    heartbeat_interval_secs: u64,
    client_timeout_secs: u64,
    audit_file: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    broker_bind_address: String,
    broker_port: u16,
    mqtt_egress_enabled: bool,
    mqtt_egress_validations_topic: String,
    mqtt_egress_metrics_topic: String,
    mqtt_egress_subscribers_topic: String,
    mqtt_egress_metrics_interval_secs: u64,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            api_bind_address: toml_config.api.bind_address,
            api_port: toml_config.api.port,
            country_code: toml_config.identity.country_code,
            local_number_len: toml_config.identity.local_number_len,
            store_seed_file: toml_config.store.seed_file,
            queue_capacity: toml_config.broadcast.queue_capacity,
            heartbeat_interval_secs: toml_config.broadcast.heartbeat_interval_secs,
            client_timeout_secs: toml_config.broadcast.client_timeout_secs,
            audit_file: toml_config.audit.file,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_validations_topic: toml_config.mqtt_egress.validations_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            mqtt_egress_subscribers_topic: toml_config.mqtt_egress.subscribers_topic,
            mqtt_egress_metrics_interval_secs: toml_config.mqtt_egress.metrics_publish_interval_secs,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: config_file.to_string(),
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        // Default to dev.toml
        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }

    pub fn api_port(&self) -> u16 {
        self.api_port
    }

    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    pub fn local_number_len(&self) -> usize {
        self.local_number_len
    }

    /// Dialing plan derived from the identity section
    pub fn dialing_plan(&self) -> crate::domain::identifier::DialingPlan {
        crate::domain::identifier::DialingPlan::new(&self.country_code, self.local_number_len)
    }

    pub fn store_seed_file(&self) -> Option<&str> {
        self.store_seed_file.as_deref()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn heartbeat_interval_secs(&self) -> u64 {
        self.heartbeat_interval_secs
    }

    pub fn client_timeout_secs(&self) -> u64 {
        self.client_timeout_secs
    }

    pub fn audit_file(&self) -> &str {
        &self.audit_file
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_validations_topic(&self) -> &str {
        &self.mqtt_egress_validations_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn mqtt_egress_subscribers_topic(&self) -> &str {
        &self.mqtt_egress_subscribers_topic
    }

    pub fn mqtt_egress_metrics_interval_secs(&self) -> u64 {
        self.mqtt_egress_metrics_interval_secs
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the backlog bound
    #[cfg(test)]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "faregate");
        assert_eq!(config.api_port(), 8080);
        assert_eq!(config.country_code(), "228");
        assert_eq!(config.local_number_len(), 8);
        assert_eq!(config.queue_capacity(), 64);
        assert_eq!(config.heartbeat_interval_secs(), 15);
        assert_eq!(config.client_timeout_secs(), 60);
        assert_eq!(config.audit_file(), "validations.jsonl");
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert!(config.mqtt_egress_enabled());
        assert_eq!(config.metrics_interval_secs(), 10);
        assert_eq!(config.prometheus_port(), 9090);
    }

    #[test]
    fn test_dialing_plan_from_config() {
        let config = Config::default();
        let plan = config.dialing_plan();
        assert_eq!(plan.country_code(), "228");
        assert_eq!(plan.local_len(), 8);
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["faregate".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "faregate".to_string(),
            "--config".to_string(),
            "config/depot-north.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/depot-north.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["faregate".to_string(), "--config=config/terminal-2.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/terminal-2.toml");
    }

    #[test]
    fn test_audit_file_default() {
        let audit = AuditConfig::default();
        assert_eq!(audit.file, "validations.jsonl");
        assert!(!audit.file.is_empty());
    }
}
