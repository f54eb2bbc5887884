// Copyright 2025 Devicelink (https://github.com/devicelink)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bridge Server Configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub devices: DeviceConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub mcp: McpConfig,

    /// Default tracing directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttConfig {
    /// Broker hostname or IP
    #[serde(default = "default_broker")]
    pub broker: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file (parent directory must be writable)
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Minutes of silence before a device is marked offline
    #[serde(default = "default_device_timeout_minutes")]
    pub timeout_minutes: u64,

    /// Bound on the per-device recent-error ring
    #[serde(default = "default_max_recent_errors")]
    pub max_recent_errors: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Days of sensor time-series to keep
    #[serde(default = "default_retention_days")]
    pub sensor_days: i64,

    /// Days of error log to keep
    #[serde(default = "default_retention_days")]
    pub error_days: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// Per-call deadline in seconds
    #[serde(default = "default_tool_deadline_secs")]
    pub deadline_secs: u64,

    /// Row cap for history queries
    #[serde(default = "default_history_limit")]
    pub history_limit: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpConfig {
    /// HTTP transport listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
}

// Default values
fn default_log_level() -> String {
    "info".to_string()
}

fn default_broker() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "devicelink-bridge".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/bridge.db")
}

fn default_device_timeout_minutes() -> u64 {
    5
}

fn default_max_recent_errors() -> usize {
    100
}

fn default_retention_days() -> i64 {
    30
}

fn default_tool_deadline_secs() -> u64 {
    5
}

fn default_history_limit() -> i64 {
    1000
}

fn default_http_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_device_timeout_minutes(),
            max_recent_errors: default_max_recent_errors(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sensor_days: default_retention_days(),
            error_days: default_retention_days(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_tool_deadline_secs(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            storage: StorageConfig::default(),
            devices: DeviceConfig::default(),
            retention: RetentionConfig::default(),
            tools: ToolsConfig::default(),
            mcp: McpConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - MQTT_BROKER / MQTT_PORT / MQTT_USERNAME / MQTT_PASSWORD
    /// - DB_PATH: SQLite database file path
    /// - DEVICE_TIMEOUT_MINUTES: silence threshold before offline
    /// - RETENTION_DAYS: retention window for sensor data and errors
    /// - LOG_LEVEL: default tracing directive
    /// - HTTP_ADDR: MCP HTTP transport listen address
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(broker) = std::env::var("MQTT_BROKER") {
            config.mqtt.broker = broker;
        }
        if let Ok(port) = std::env::var("MQTT_PORT") {
            if let Ok(val) = port.parse() {
                config.mqtt.port = val;
            }
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        if let Ok(db_path) = std::env::var("DB_PATH") {
            config.storage.db_path = PathBuf::from(db_path);
        }
        if let Ok(timeout) = std::env::var("DEVICE_TIMEOUT_MINUTES") {
            if let Ok(val) = timeout.parse() {
                config.devices.timeout_minutes = val;
            }
        }
        if let Ok(days) = std::env::var("RETENTION_DAYS") {
            if let Ok(val) = days.parse::<i64>() {
                config.retention.sensor_days = val;
                config.retention.error_days = val;
            }
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            config.mcp.http_addr = addr;
        }

        config
    }

    /// Load configuration with priority: flags (applied by the caller) >
    /// env > file > defaults.
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        config = Self::merge_with_env(config);
        Ok(config)
    }

    /// Merge config with environment variables (env takes priority)
    fn merge_with_env(mut config: Self) -> Self {
        let env_config = Self::from_env();

        if std::env::var("MQTT_BROKER").is_ok() {
            config.mqtt.broker = env_config.mqtt.broker;
        }
        if std::env::var("MQTT_PORT").is_ok() {
            config.mqtt.port = env_config.mqtt.port;
        }
        if std::env::var("MQTT_USERNAME").is_ok() {
            config.mqtt.username = env_config.mqtt.username;
        }
        if std::env::var("MQTT_PASSWORD").is_ok() {
            config.mqtt.password = env_config.mqtt.password;
        }
        if std::env::var("DB_PATH").is_ok() {
            config.storage.db_path = env_config.storage.db_path;
        }
        if std::env::var("DEVICE_TIMEOUT_MINUTES").is_ok() {
            config.devices.timeout_minutes = env_config.devices.timeout_minutes;
        }
        if std::env::var("RETENTION_DAYS").is_ok() {
            config.retention = env_config.retention;
        }
        if std::env::var("LOG_LEVEL").is_ok() {
            config.log_level = env_config.log_level;
        }
        if std::env::var("HTTP_ADDR").is_ok() {
            config.mcp.http_addr = env_config.mcp.http_addr;
        }

        config
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.devices.timeout_minutes * 60)
    }

    pub fn tool_deadline(&self) -> Duration {
        Duration::from_secs(self.tools.deadline_secs)
    }

    /// Parse the MCP HTTP listen address
    pub fn http_socket_addr(&self) -> Result<SocketAddr> {
        Ok(self.mcp.http_addr.parse()?)
    }

    /// Validate configuration; failures here abort startup.
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.broker.is_empty() {
            anyhow::bail!("MQTT broker address must not be empty");
        }
        if self.mqtt.port == 0 {
            anyhow::bail!("MQTT port must be non-zero");
        }
        if self.devices.timeout_minutes == 0 {
            anyhow::bail!("Device timeout must be at least one minute");
        }
        if self.retention.sensor_days <= 0 || self.retention.error_days <= 0 {
            anyhow::bail!("Retention windows must be positive");
        }
        self.http_socket_addr()?;

        // The database directory must be writable
        if let Some(parent) = self.storage.db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(())
    }
}
