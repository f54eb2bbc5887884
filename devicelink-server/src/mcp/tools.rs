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

//! Bridge tool implementations
//!
//! The fixed tool set exposed to AI clients: fleet queries read from the
//! registry (and history from the store); `control_actuator` is the single
//! tool with a side effect, publishing a command frame on the bus.

use crate::bus::{command_topic, BusPublisher};
use crate::mcp::registry::{McpTool, RegistrationError, ToolContext, ToolError, ToolRegistry, ToolResult};
use crate::registry::DeviceRegistry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use devicelink_core::{BridgeError, CommandPayload, Device};
use devicelink_storage::{ErrorQuery, Store};
use rumqttc::QoS;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Shared state handed to every tool.
pub struct ToolDeps {
    pub registry: Arc<DeviceRegistry>,
    pub store: Arc<Store>,
    pub bus: Arc<dyn BusPublisher>,
    pub history_limit: i64,
    pub started_at: DateTime<Utc>,
}

/// Register the full tool set in its canonical order.
pub fn register_tools(
    registry: &ToolRegistry,
    deps: Arc<ToolDeps>,
) -> Result<(), RegistrationError> {
    registry.register(Arc::new(ListDevicesTool::new(deps.clone())))?;
    registry.register(Arc::new(ReadSensorTool::new(deps.clone())))?;
    registry.register(Arc::new(ReadAllSensorsTool::new(deps.clone())))?;
    registry.register(Arc::new(ControlActuatorTool::new(deps.clone())))?;
    registry.register(Arc::new(GetDeviceInfoTool::new(deps.clone())))?;
    registry.register(Arc::new(QueryDevicesTool::new(deps.clone())))?;
    registry.register(Arc::new(GetAlertsTool::new(deps.clone())))?;
    registry.register(Arc::new(GetSystemStatusTool::new(deps.clone())))?;
    registry.register(Arc::new(GetDeviceMetricsTool::new(deps)))?;
    Ok(())
}

fn device_summary(device: &Device) -> Value {
    json!({
        "device_id": device.device_id,
        "is_online": device.online,
        "last_seen": device.last_seen.to_rfc3339(),
        "sensors": device.capabilities.sensors,
        "actuators": device.capabilities.actuators,
        "capabilities": {
            "sensors": device.capabilities.sensors,
            "actuators": device.capabilities.actuators,
            "metadata": device.capabilities.metadata,
            "firmware_version": device.capabilities.firmware_version,
            "hardware_version": device.capabilities.hardware_version,
        },
    })
}

// =============================================================================
// list_devices
// =============================================================================

pub struct ListDevicesTool {
    deps: Arc<ToolDeps>,
    schema: Value,
}

#[derive(Debug, Deserialize)]
struct ListDevicesParams {
    #[serde(default)]
    online_only: bool,
}

impl ListDevicesTool {
    pub fn new(deps: Arc<ToolDeps>) -> Self {
        Self {
            deps,
            schema: json!({
                "type": "object",
                "properties": {
                    "online_only": {
                        "type": "boolean",
                        "description": "Only include devices currently online"
                    }
                },
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl McpTool for ListDevicesTool {
    fn name(&self) -> &str {
        "list_devices"
    }
    fn description(&self) -> &str {
        "List all known IoT devices with their capabilities and online state"
    }
    fn input_schema(&self) -> &Value {
        &self.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let params: ListDevicesParams =
            serde_json::from_value(params).map_err(|e| ToolError::InvalidParams(e.to_string()))?;
        let devices: Vec<Value> = self
            .deps
            .registry
            .list(params.online_only)
            .iter()
            .map(device_summary)
            .collect();
        Ok(ToolResult {
            content: Value::Array(devices),
        })
    }
}

// =============================================================================
// read_sensor
// =============================================================================

pub struct ReadSensorTool {
    deps: Arc<ToolDeps>,
    schema: Value,
}

#[derive(Debug, Deserialize)]
struct ReadSensorParams {
    device_id: String,
    sensor_type: String,
    #[serde(default)]
    history_minutes: i64,
}

impl ReadSensorTool {
    pub fn new(deps: Arc<ToolDeps>) -> Self {
        Self {
            deps,
            schema: json!({
                "type": "object",
                "properties": {
                    "device_id": { "type": "string" },
                    "sensor_type": { "type": "string" },
                    "history_minutes": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Include persisted history from the last N minutes"
                    }
                },
                "required": ["device_id", "sensor_type"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl McpTool for ReadSensorTool {
    fn name(&self) -> &str {
        "read_sensor"
    }
    fn description(&self) -> &str {
        "Read the current value of one sensor, optionally with history"
    }
    fn input_schema(&self) -> &Value {
        &self.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let params: ReadSensorParams =
            serde_json::from_value(params).map_err(|e| ToolError::InvalidParams(e.to_string()))?;

        let device = self
            .deps
            .registry
            .get(&params.device_id)
            .ok_or_else(|| BridgeError::DeviceNotFound(params.device_id.clone()))?;
        let current = device
            .sensor_readings
            .get(&params.sensor_type)
            .ok_or_else(|| BridgeError::SensorNotFound {
                device: params.device_id.clone(),
                sensor: params.sensor_type.clone(),
            })?;

        let mut result = json!({
            "device_id": params.device_id,
            "sensor_type": params.sensor_type,
            "current_value": current.value,
            "unit": current.unit,
            "timestamp": current.timestamp.timestamp(),
            "quality": current.quality,
        });

        if params.history_minutes > 0 {
            let rows = self
                .deps
                .store
                .get_sensor_data(
                    &params.device_id,
                    &params.sensor_type,
                    params.history_minutes,
                    self.deps.history_limit,
                )
                .await
                .map_err(BridgeError::from)?;
            let history: Vec<Value> = rows
                .iter()
                .map(|row| {
                    json!({
                        "value": row.value,
                        "timestamp": row.timestamp_ms / 1000,
                        "unit": row.unit,
                        "quality": row.quality,
                    })
                })
                .collect();
            result["history"] = Value::Array(history);
        }

        Ok(ToolResult { content: result })
    }
}

// =============================================================================
// read_all_sensors
// =============================================================================

pub struct ReadAllSensorsTool {
    deps: Arc<ToolDeps>,
    schema: Value,
}

#[derive(Debug, Deserialize)]
struct ReadAllSensorsParams {
    #[serde(default)]
    device_ids: Option<Vec<String>>,
    #[serde(default)]
    sensor_types: Option<Vec<String>>,
}

impl ReadAllSensorsTool {
    pub fn new(deps: Arc<ToolDeps>) -> Self {
        Self {
            deps,
            schema: json!({
                "type": "object",
                "properties": {
                    "device_ids": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Devices to read; defaults to all online devices"
                    },
                    "sensor_types": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Sensors to read; defaults to everything the device has reported"
                    }
                },
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl McpTool for ReadAllSensorsTool {
    fn name(&self) -> &str {
        "read_all_sensors"
    }
    fn description(&self) -> &str {
        "Bulk snapshot of current readings across devices"
    }
    fn input_schema(&self) -> &Value {
        &self.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let params: ReadAllSensorsParams =
            serde_json::from_value(params).map_err(|e| ToolError::InvalidParams(e.to_string()))?;

        let device_ids = match params.device_ids {
            Some(ids) => ids,
            None => self
                .deps
                .registry
                .list(true)
                .into_iter()
                .map(|d| d.device_id)
                .collect(),
        };

        let mut devices = serde_json::Map::new();
        let mut online = 0usize;
        for device_id in &device_ids {
            let device = match self.deps.registry.get(device_id) {
                Some(d) if d.online => d,
                _ => {
                    devices.insert(
                        device_id.clone(),
                        json!({"error": format!("Device {device_id} not found or offline")}),
                    );
                    continue;
                }
            };
            online += 1;

            let sensors_to_read: Vec<String> = params
                .sensor_types
                .clone()
                .unwrap_or_else(|| device.sensor_readings.keys().cloned().collect());

            let mut sensors = serde_json::Map::new();
            for sensor_type in sensors_to_read {
                match device.sensor_readings.get(&sensor_type) {
                    Some(reading) => sensors.insert(
                        sensor_type,
                        json!({
                            "value": reading.value,
                            "unit": reading.unit,
                            "quality": reading.quality,
                            "timestamp": reading.timestamp.timestamp(),
                        }),
                    ),
                    None => sensors.insert(
                        sensor_type.clone(),
                        json!({"error": format!("Sensor {sensor_type} not found")}),
                    ),
                };
            }
            devices.insert(device_id.clone(), Value::Object(sensors));
        }

        Ok(ToolResult {
            content: json!({
                "timestamp": Utc::now().timestamp(),
                "devices": devices,
                "total_devices": device_ids.len(),
                "online_devices": online,
            }),
        })
    }
}

// =============================================================================
// control_actuator
// =============================================================================

pub struct ControlActuatorTool {
    deps: Arc<ToolDeps>,
    schema: Value,
}

#[derive(Debug, Deserialize)]
struct ControlActuatorParams {
    device_id: String,
    actuator_type: String,
    action: String,
    #[serde(default)]
    value: Option<Value>,
}

impl ControlActuatorTool {
    pub fn new(deps: Arc<ToolDeps>) -> Self {
        Self {
            deps,
            schema: json!({
                "type": "object",
                "properties": {
                    "device_id": { "type": "string" },
                    "actuator_type": { "type": "string" },
                    "action": { "type": "string" },
                    "value": { "description": "Optional action argument" }
                },
                "required": ["device_id", "actuator_type", "action"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl McpTool for ControlActuatorTool {
    fn name(&self) -> &str {
        "control_actuator"
    }
    fn description(&self) -> &str {
        "Send a command to a device actuator over the bus"
    }
    fn input_schema(&self) -> &Value {
        &self.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let params: ControlActuatorParams =
            serde_json::from_value(params).map_err(|e| ToolError::InvalidParams(e.to_string()))?;

        let device = self
            .deps
            .registry
            .get(&params.device_id)
            .ok_or_else(|| BridgeError::DeviceNotFound(params.device_id.clone()))?;
        if !device.online {
            return Err(BridgeError::DeviceOffline(params.device_id).into());
        }
        if !device.has_actuator(&params.actuator_type) {
            return Err(BridgeError::UnknownActuator {
                device: params.device_id,
                actuator: params.actuator_type,
            }
            .into());
        }

        let now = Utc::now();
        let command = CommandPayload {
            action: params.action.clone(),
            value: params.value.clone(),
            timestamp: now.timestamp() as f64,
        };
        let payload = serde_json::to_value(&command)
            .map_err(|e| BridgeError::InvalidPayload(e.to_string()))?;

        self.deps
            .bus
            .publish_json(
                &command_topic(&params.device_id, &params.actuator_type),
                &payload,
                QoS::AtLeastOnce,
                false,
            )
            .await?;
        self.deps.registry.increment_sent(&params.device_id, now);

        info!(
            device_id = %params.device_id,
            actuator = %params.actuator_type,
            action = %params.action,
            "actuator command sent"
        );

        Ok(ToolResult {
            content: json!({
                "device_id": params.device_id,
                "actuator_type": params.actuator_type,
                "action": params.action,
                "value": params.value,
                "timestamp": command.timestamp,
                "status": "command_sent",
            }),
        })
    }
}

// =============================================================================
// get_device_info
// =============================================================================

pub struct GetDeviceInfoTool {
    deps: Arc<ToolDeps>,
    schema: Value,
}

#[derive(Debug, Deserialize)]
struct GetDeviceInfoParams {
    device_id: String,
}

impl GetDeviceInfoTool {
    pub fn new(deps: Arc<ToolDeps>) -> Self {
        Self {
            deps,
            schema: json!({
                "type": "object",
                "properties": {
                    "device_id": { "type": "string" }
                },
                "required": ["device_id"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl McpTool for GetDeviceInfoTool {
    fn name(&self) -> &str {
        "get_device_info"
    }
    fn description(&self) -> &str {
        "Detailed state, capabilities and metrics for one device"
    }
    fn input_schema(&self) -> &Value {
        &self.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let params: GetDeviceInfoParams =
            serde_json::from_value(params).map_err(|e| ToolError::InvalidParams(e.to_string()))?;

        let device = self
            .deps
            .registry
            .get(&params.device_id)
            .ok_or_else(|| BridgeError::DeviceNotFound(params.device_id.clone()))?;
        let now = Utc::now();

        let sensors: serde_json::Map<String, Value> = device
            .sensor_readings
            .iter()
            .map(|(name, reading)| {
                (
                    name.clone(),
                    json!({
                        "value": reading.value,
                        "unit": reading.unit,
                        "quality": reading.quality,
                        "timestamp": reading.timestamp.timestamp(),
                        "age_seconds": (now - reading.timestamp).num_seconds(),
                    }),
                )
            })
            .collect();

        let actuators: serde_json::Map<String, Value> = device
            .actuator_states
            .iter()
            .map(|(name, state)| {
                (
                    name.clone(),
                    json!({
                        "state": state.state,
                        "timestamp": state.timestamp.timestamp(),
                        "age_seconds": (now - state.timestamp).num_seconds(),
                    }),
                )
            })
            .collect();

        let metrics = self.deps.registry.get_metrics(&params.device_id);
        let metrics_json = metrics
            .map(|m| {
                json!({
                    "messages_sent": m.messages_sent,
                    "messages_received": m.messages_received,
                    "connection_failures": m.connection_failures,
                    "sensor_read_errors": m.sensor_read_errors,
                    "last_activity": m.last_activity.to_rfc3339(),
                    "uptime_seconds": m.uptime_seconds(now),
                })
            })
            .unwrap_or(Value::Null);

        // Recent errors, newest last, capped at ten for readability.
        let recent_errors: Vec<Value> = device
            .errors
            .iter()
            .rev()
            .take(10)
            .rev()
            .map(|e| {
                json!({
                    "error_type": e.error_type,
                    "message": e.message,
                    "severity": e.severity,
                    "timestamp": e.timestamp.timestamp(),
                })
            })
            .collect();

        let stored_capabilities = self
            .deps
            .store
            .get_capabilities(&params.device_id)
            .await
            .map_err(BridgeError::from)?
            .map(|row| {
                json!({
                    "sensors": serde_json::from_str::<Value>(&row.sensors_json)
                        .unwrap_or(Value::Null),
                    "actuators": serde_json::from_str::<Value>(&row.actuators_json)
                        .unwrap_or(Value::Null),
                    "metadata": serde_json::from_str::<Value>(&row.metadata_json)
                        .unwrap_or(Value::Null),
                    "firmware_version": row.firmware_version,
                    "hardware_version": row.hardware_version,
                    "last_updated": row.last_updated_ms / 1000,
                })
            })
            .unwrap_or(Value::Null);

        Ok(ToolResult {
            content: json!({
                "device_id": device.device_id,
                "online": device.online,
                "last_seen": device.last_seen.to_rfc3339(),
                "capabilities": {
                    "sensors": device.capabilities.sensors,
                    "actuators": device.capabilities.actuators,
                    "metadata": device.capabilities.metadata,
                    "firmware_version": device.capabilities.firmware_version,
                    "hardware_version": device.capabilities.hardware_version,
                },
                "current_state": {
                    "sensors": sensors,
                    "actuators": actuators,
                },
                "metrics": metrics_json,
                "recent_errors": recent_errors,
                "recent_error_count": device.errors.len(),
                "stored_capabilities": stored_capabilities,
            }),
        })
    }
}

// =============================================================================
// query_devices
// =============================================================================

pub struct QueryDevicesTool {
    deps: Arc<ToolDeps>,
    schema: Value,
}

#[derive(Debug, Deserialize)]
struct QueryDevicesParams {
    #[serde(default)]
    sensor_type: Option<String>,
    #[serde(default)]
    actuator_type: Option<String>,
    #[serde(default)]
    online_only: bool,
}

impl QueryDevicesTool {
    pub fn new(deps: Arc<ToolDeps>) -> Self {
        Self {
            deps,
            schema: json!({
                "type": "object",
                "properties": {
                    "sensor_type": { "type": "string" },
                    "actuator_type": { "type": "string" },
                    "online_only": { "type": "boolean" }
                },
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl McpTool for QueryDevicesTool {
    fn name(&self) -> &str {
        "query_devices"
    }
    fn description(&self) -> &str {
        "Find devices advertising a given sensor or actuator"
    }
    fn input_schema(&self) -> &Value {
        &self.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let params: QueryDevicesParams =
            serde_json::from_value(params).map_err(|e| ToolError::InvalidParams(e.to_string()))?;
        let devices: Vec<Value> = self
            .deps
            .registry
            .filter_by_capability(
                params.sensor_type.as_deref(),
                params.actuator_type.as_deref(),
                params.online_only,
            )
            .iter()
            .map(device_summary)
            .collect();
        Ok(ToolResult {
            content: Value::Array(devices),
        })
    }
}

// =============================================================================
// get_alerts
// =============================================================================

pub struct GetAlertsTool {
    deps: Arc<ToolDeps>,
    schema: Value,
}

#[derive(Debug, Deserialize)]
struct GetAlertsParams {
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    severity_min: Option<i64>,
    #[serde(default)]
    since_minutes: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
}

impl GetAlertsTool {
    pub fn new(deps: Arc<ToolDeps>) -> Self {
        Self {
            deps,
            schema: json!({
                "type": "object",
                "properties": {
                    "device_id": { "type": "string" },
                    "severity_min": { "type": "integer", "minimum": 0, "maximum": 3 },
                    "since_minutes": { "type": "integer", "minimum": 1 },
                    "limit": { "type": "integer", "minimum": 1 }
                },
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl McpTool for GetAlertsTool {
    fn name(&self) -> &str {
        "get_alerts"
    }
    fn description(&self) -> &str {
        "Recent device errors from the persistent log"
    }
    fn input_schema(&self) -> &Value {
        &self.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let params: GetAlertsParams =
            serde_json::from_value(params).map_err(|e| ToolError::InvalidParams(e.to_string()))?;

        let mut query = ErrorQuery {
            device_id: params.device_id,
            min_severity: params.severity_min,
            since_minutes: params.since_minutes,
            ..Default::default()
        };
        if let Some(limit) = params.limit {
            query.limit = limit;
        }

        let rows = self
            .deps
            .store
            .get_device_errors(&query)
            .await
            .map_err(BridgeError::from)?;
        let alerts: Vec<Value> = rows
            .iter()
            .map(|row| {
                json!({
                    "device_id": row.device_id,
                    "error_type": row.error_type,
                    "message": row.message,
                    "severity": row.severity,
                    "timestamp": row.timestamp_ms / 1000,
                })
            })
            .collect();
        Ok(ToolResult {
            content: Value::Array(alerts),
        })
    }
}

// =============================================================================
// get_system_status
// =============================================================================

pub struct GetSystemStatusTool {
    deps: Arc<ToolDeps>,
    schema: Value,
}

impl GetSystemStatusTool {
    pub fn new(deps: Arc<ToolDeps>) -> Self {
        Self {
            deps,
            schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl McpTool for GetSystemStatusTool {
    fn name(&self) -> &str {
        "get_system_status"
    }
    fn description(&self) -> &str {
        "Bridge-wide health: fleet counts, bus and store state, uptime"
    }
    fn input_schema(&self) -> &Value {
        &self.schema
    }

    async fn execute(&self, _params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let (total, online) = self.deps.registry.counts();
        let stats = self.deps.store.stats().await.ok();
        let uptime = (Utc::now() - self.deps.started_at).num_seconds();

        Ok(ToolResult {
            content: json!({
                "devices_total": total,
                "devices_online": online,
                "bus_connected": self.deps.bus.is_connected(),
                "store_accessible": stats.is_some(),
                "uptime_seconds": uptime,
                "database": stats,
            }),
        })
    }
}

// =============================================================================
// get_device_metrics
// =============================================================================

pub struct GetDeviceMetricsTool {
    deps: Arc<ToolDeps>,
    schema: Value,
}

#[derive(Debug, Deserialize)]
struct GetDeviceMetricsParams {
    #[serde(default)]
    device_id: Option<String>,
}

impl GetDeviceMetricsTool {
    pub fn new(deps: Arc<ToolDeps>) -> Self {
        Self {
            deps,
            schema: json!({
                "type": "object",
                "properties": {
                    "device_id": { "type": "string" }
                },
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl McpTool for GetDeviceMetricsTool {
    fn name(&self) -> &str {
        "get_device_metrics"
    }
    fn description(&self) -> &str {
        "Bridge-derived traffic counters, per device"
    }
    fn input_schema(&self) -> &Value {
        &self.schema
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let params: GetDeviceMetricsParams =
            serde_json::from_value(params).map_err(|e| ToolError::InvalidParams(e.to_string()))?;

        let rows = self
            .deps
            .store
            .get_metrics(params.device_id.as_deref())
            .await
            .map_err(BridgeError::from)?;
        let metrics: Vec<Value> = rows
            .iter()
            .map(|row| {
                json!({
                    "device_id": row.device_id,
                    "messages_sent": row.messages_sent,
                    "messages_received": row.messages_received,
                    "connection_failures": row.connection_failures,
                    "sensor_read_errors": row.sensor_read_errors,
                    "last_activity": row.last_activity_ms / 1000,
                    "uptime_start": row.uptime_start_ms / 1000,
                })
            })
            .collect();
        Ok(ToolResult {
            content: Value::Array(metrics),
        })
    }
}
