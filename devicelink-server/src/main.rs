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
use clap::Parser;
use devicelink_server::{config::BridgeConfig, run_server, TransportMode};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "MQTT-to-MCP bridge for IoT device fleets", long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker hostname or IP
    #[arg(long, env = "MQTT_BROKER")]
    mqtt_broker: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT")]
    mqtt_port: Option<u16>,

    /// MQTT username for authentication
    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// MQTT password for authentication
    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    /// SQLite database file path
    #[arg(long, env = "DB_PATH")]
    db_path: Option<PathBuf>,

    /// Minutes of silence before a device is marked offline
    #[arg(long, env = "DEVICE_TIMEOUT_MINUTES")]
    device_timeout_minutes: Option<u64>,

    /// Days of sensor data and error log to keep
    #[arg(long, env = "RETENTION_DAYS")]
    retention_days: Option<i64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// HTTP listen address for the MCP transport
    #[arg(long, env = "HTTP_ADDR")]
    http_addr: Option<String>,

    /// Serve MCP over stdio instead of HTTP
    #[arg(long)]
    stdio: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration (env overrides file, flags override env)
    let mut config = BridgeConfig::load(args.config)?;

    if let Some(broker) = args.mqtt_broker {
        config.mqtt.broker = broker;
    }
    if let Some(port) = args.mqtt_port {
        config.mqtt.port = port;
    }
    if let Some(username) = args.mqtt_username {
        config.mqtt.username = Some(username);
    }
    if let Some(password) = args.mqtt_password {
        config.mqtt.password = Some(password);
    }
    if let Some(db_path) = args.db_path {
        config.storage.db_path = db_path;
    }
    if let Some(timeout) = args.device_timeout_minutes {
        config.devices.timeout_minutes = timeout;
    }
    if let Some(days) = args.retention_days {
        config.retention.sensor_days = days;
        config.retention.error_days = days;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(addr) = args.http_addr {
        config.mcp.http_addr = addr;
    }

    let transport = if args.stdio {
        TransportMode::Stdio
    } else {
        TransportMode::Http
    };

    run_server(config, transport).await
}
