//! Configuration loading from TOML files
//!
//! The file is selected with `--config <path>` (default `config/dev.toml`).
//! Every field has a default, so a partial file only overrides what it names.

use crate::domain::aggregate::{Tenths, TieBreak};
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct DisplaySection {
    /// Identifier of this screen, used as metrics label and MQTT client id prefix
    #[serde(default = "default_display_id")]
    pub id: String,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self { id: default_display_id() }
    }
}

fn default_display_id() -> String {
    "live-display".to_string()
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
    /// Vote inserts for group `G` arrive on `<prefix>/G`
    #[serde(default = "default_feed_topic_prefix")]
    pub feed_topic_prefix: String,
    /// Retained topic the display frames are published on
    #[serde(default = "default_display_topic")]
    pub display_topic: String,
    #[serde(default = "default_subscribe_timeout_ms")]
    pub subscribe_timeout_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            feed_topic_prefix: default_feed_topic_prefix(),
            display_topic: default_display_topic(),
            subscribe_timeout_ms: default_subscribe_timeout_ms(),
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_feed_topic_prefix() -> String {
    "votes".to_string()
}

fn default_display_topic() -> String {
    "live/display".to_string()
}

fn default_subscribe_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the REST backend (PostgREST-style `/rest/v1` routes)
    #[serde(default = "default_store_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_store_base_url(),
            api_key: String::new(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

fn default_store_base_url() -> String {
    "http://localhost:54321".to_string()
}

fn default_store_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevealConfig {
    #[serde(default = "default_suspense_ms")]
    pub suspense_ms: u64,
    #[serde(default = "default_count_up_ms")]
    pub count_up_ms: u64,
    /// Delay after the reveal before the "who voted" label is cleared
    #[serde(default = "default_label_clear_ms")]
    pub label_clear_ms: u64,
    /// Minimum distance of the count-up start value from the target
    #[serde(default = "default_count_up_offset")]
    pub count_up_offset: f64,
    #[serde(default)]
    pub tie_break: TieBreak,
    #[serde(default = "default_anonymous_label")]
    pub anonymous_label: String,
    #[serde(default = "default_roster_size")]
    pub roster_size: usize,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            suspense_ms: default_suspense_ms(),
            count_up_ms: default_count_up_ms(),
            label_clear_ms: default_label_clear_ms(),
            count_up_offset: default_count_up_offset(),
            tie_break: TieBreak::default(),
            anonymous_label: default_anonymous_label(),
            roster_size: default_roster_size(),
        }
    }
}

fn default_suspense_ms() -> u64 {
    3000
}

fn default_count_up_ms() -> u64 {
    2000
}

fn default_label_clear_ms() -> u64 {
    5000
}

fn default_count_up_offset() -> f64 {
    1.0
}

fn default_anonymous_label() -> String {
    "Anonymous".to_string()
}

fn default_roster_size() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// How often the active group is re-resolved
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { poll_interval_secs: default_poll_interval_secs() }
    }
}

fn default_poll_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval_secs(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

fn default_prometheus_port() -> u16 {
    9100
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub display: DisplaySection,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub reveal: RevealConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    display_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    feed_topic_prefix: String,
    display_topic: String,
    subscribe_timeout_ms: u64,
    store_base_url: String,
    store_api_key: String,
    store_timeout_ms: u64,
    suspense_ms: u64,
    count_up_ms: u64,
    label_clear_ms: u64,
    count_up_offset: Tenths,
    tie_break: TieBreak,
    anonymous_label: String,
    roster_size: usize,
    schedule_poll_interval_secs: u64,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    /// Build from already-parsed TOML sections
    pub fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            display_id: toml_config.display.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            feed_topic_prefix: toml_config.mqtt.feed_topic_prefix.trim_end_matches('/').to_string(),
            display_topic: toml_config.mqtt.display_topic,
            subscribe_timeout_ms: toml_config.mqtt.subscribe_timeout_ms,
            store_base_url: toml_config.store.base_url.trim_end_matches('/').to_string(),
            store_api_key: toml_config.store.api_key,
            store_timeout_ms: toml_config.store.timeout_ms,
            suspense_ms: toml_config.reveal.suspense_ms,
            count_up_ms: toml_config.reveal.count_up_ms,
            label_clear_ms: toml_config.reveal.label_clear_ms,
            count_up_offset: Tenths::from(toml_config.reveal.count_up_offset),
            tie_break: toml_config.reveal.tie_break,
            anonymous_label: toml_config.reveal.anonymous_label,
            roster_size: toml_config.reveal.roster_size,
            schedule_poll_interval_secs: toml_config.schedule.poll_interval_secs.max(1),
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            prometheus_port: toml_config.metrics.prometheus_port,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults on any error
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    pub fn display_id(&self) -> &str {
        &self.display_id
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

    pub fn feed_topic_prefix(&self) -> &str {
        &self.feed_topic_prefix
    }

    pub fn display_topic(&self) -> &str {
        &self.display_topic
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn store_base_url(&self) -> &str {
        &self.store_base_url
    }

    pub fn store_api_key(&self) -> &str {
        &self.store_api_key
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn suspense(&self) -> Duration {
        Duration::from_millis(self.suspense_ms)
    }

    pub fn count_up(&self) -> Duration {
        Duration::from_millis(self.count_up_ms)
    }

    pub fn label_clear(&self) -> Duration {
        Duration::from_millis(self.label_clear_ms)
    }

    pub fn count_up_offset(&self) -> Tenths {
        self.count_up_offset
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    pub fn anonymous_label(&self) -> &str {
        &self.anonymous_label
    }

    pub fn roster_size(&self) -> usize {
        self.roster_size
    }

    pub fn schedule_poll_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_poll_interval_secs)
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
