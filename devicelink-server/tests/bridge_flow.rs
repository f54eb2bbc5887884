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

//! End-to-end bridge flow: decoded bus messages through the router into
//! registry and store, read back through the tool surface, with actuator
//! commands captured on a fake bus.

use async_trait::async_trait;
use chrono::Utc;
use devicelink_server::bus::{BusMessage, BusPublisher};
use devicelink_server::config::RetentionConfig;
use devicelink_server::mcp::{register_tools, ToolContext, ToolDeps, ToolError, ToolRegistry};
use devicelink_server::registry::DeviceRegistry;
use devicelink_server::router::MessageRouter;
use devicelink_server::supervisor::Supervisor;
use devicelink_core::BridgeError;
use devicelink_storage::Store;
use rumqttc::QoS;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct CapturedPublish {
    topic: String,
    payload: Value,
    qos: QoS,
    retain: bool,
}

/// Fake bus that records publishes instead of talking to a broker.
struct CaptureBus {
    published: parking_lot::Mutex<Vec<CapturedPublish>>,
    connected: AtomicBool,
}

impl CaptureBus {
    fn new() -> Self {
        Self {
            published: parking_lot::Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    fn published(&self) -> Vec<CapturedPublish> {
        self.published.lock().clone()
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl BusPublisher for CaptureBus {
    async fn publish_json(
        &self,
        topic: &str,
        payload: &Value,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::BusNotReady);
        }
        self.published.lock().push(CapturedPublish {
            topic: topic.to_string(),
            payload: payload.clone(),
            qos,
            retain,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct Harness {
    _dir: TempDir,
    registry: Arc<DeviceRegistry>,
    store: Arc<Store>,
    router: MessageRouter,
    tools: Arc<ToolRegistry>,
    bus: Arc<CaptureBus>,
}

impl Harness {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(dir.path().join("bridge.db")).await.unwrap());
        let registry = Arc::new(DeviceRegistry::new(100));
        let router = MessageRouter::new(registry.clone(), store.clone());
        let bus = Arc::new(CaptureBus::new());

        let tools = Arc::new(ToolRegistry::new());
        let deps = Arc::new(ToolDeps {
            registry: registry.clone(),
            store: store.clone(),
            bus: bus.clone(),
            history_limit: 1000,
            started_at: Utc::now(),
        });
        register_tools(&tools, deps).unwrap();

        Self {
            _dir: dir,
            registry,
            store,
            router,
            tools,
            bus,
        }
    }

    async fn publish(&self, topic: &str, payload: Value) {
        self.router
            .dispatch(BusMessage {
                topic: topic.to_string(),
                payload,
            })
            .await;
    }

    async fn call(&self, tool: &str, params: Value) -> Result<Value, ToolError> {
        let context = ToolContext {
            deadline: Duration::from_secs(5),
        };
        self.tools
            .execute(tool, params, &context)
            .await
            .map(|r| r.content)
    }

    async fn announce_device(&self) {
        self.publish(
            "devices/esp32_aa11bb/capabilities",
            json!({
                "device_id": "esp32_aa11bb",
                "firmware_version": "1.0.0",
                "sensors": ["temperature"],
                "actuators": ["led"],
                "metadata": {"temperature": {"unit": "°C"}}
            }),
        )
        .await;
    }
}

#[tokio::test]
async fn s1_first_sight_device() {
    let h = Harness::new().await;
    h.announce_device().await;

    let devices = h.call("list_devices", json!({})).await.unwrap();
    let devices = devices.as_array().unwrap();
    assert_eq!(devices.len(), 1);
    let device = &devices[0];
    assert_eq!(device["device_id"], "esp32_aa11bb");
    assert_eq!(device["is_online"], true);
    assert_eq!(device["sensors"], json!(["temperature"]));
    assert_eq!(device["actuators"], json!(["led"]));
}

#[tokio::test]
async fn s2_sensor_reading() {
    let h = Harness::new().await;
    h.announce_device().await;
    h.publish(
        "devices/esp32_aa11bb/sensors/temperature/data",
        json!({
            "device_id": "esp32_aa11bb",
            "timestamp": 1_700_000_000,
            "value": {"reading": 23.5, "unit": "°C", "quality": 100}
        }),
    )
    .await;

    let result = h
        .call(
            "read_sensor",
            json!({"device_id": "esp32_aa11bb", "sensor_type": "temperature"}),
        )
        .await
        .unwrap();
    assert_eq!(result["current_value"], 23.5);
    assert_eq!(result["unit"], "°C");
    assert_eq!(result["quality"], 100.0);
    assert_eq!(result["timestamp"], 1_700_000_000);
}

#[tokio::test]
async fn s3_history_sorted_descending() {
    let h = Harness::new().await;
    h.announce_device().await;

    // Recent timestamps so the 60-minute history window includes them.
    let base = Utc::now().timestamp() - 50;
    for (i, value) in [23.5, 23.6, 23.7, 23.8, 23.9].iter().enumerate() {
        h.publish(
            "devices/esp32_aa11bb/sensors/temperature/data",
            json!({
                "device_id": "esp32_aa11bb",
                "timestamp": base + (i as i64) * 10,
                "value": {"reading": value, "unit": "°C", "quality": 100}
            }),
        )
        .await;
    }

    let result = h
        .call(
            "read_sensor",
            json!({
                "device_id": "esp32_aa11bb",
                "sensor_type": "temperature",
                "history_minutes": 60
            }),
        )
        .await
        .unwrap();

    let history = result["history"].as_array().unwrap();
    assert_eq!(history.len(), 5);
    let values: Vec<f64> = history.iter().map(|h| h["value"].as_f64().unwrap()).collect();
    assert_eq!(values, vec![23.9, 23.8, 23.7, 23.6, 23.5]);
    let timestamps: Vec<i64> = history
        .iter()
        .map(|h| h["timestamp"].as_i64().unwrap())
        .collect();
    assert!(timestamps.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn s4_actuator_command_emission() {
    let h = Harness::new().await;
    h.announce_device().await;

    let result = h
        .call(
            "control_actuator",
            json!({"device_id": "esp32_aa11bb", "actuator_type": "led", "action": "toggle"}),
        )
        .await
        .unwrap();
    assert_eq!(result["status"], "command_sent");

    let published = h.bus.published();
    assert_eq!(published.len(), 1);
    let publish = &published[0];
    assert_eq!(publish.topic, "devices/esp32_aa11bb/actuators/led/cmd");
    assert_eq!(publish.qos, QoS::AtLeastOnce);
    assert!(!publish.retain);
    assert_eq!(publish.payload["action"], "toggle");
    assert!(publish.payload["timestamp"].is_number());
}

#[tokio::test]
async fn s4_actuator_preconditions() {
    let h = Harness::new().await;
    h.announce_device().await;

    // Unknown actuator.
    let err = h
        .call(
            "control_actuator",
            json!({"device_id": "esp32_aa11bb", "actuator_type": "relay", "action": "on"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unknown-actuator");

    // Unknown device.
    let err = h
        .call(
            "control_actuator",
            json!({"device_id": "nope", "actuator_type": "led", "action": "on"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "device-not-found");

    // Offline device.
    h.publish("devices/esp32_aa11bb/status", json!({"value": "offline"}))
        .await;
    let err = h
        .call(
            "control_actuator",
            json!({"device_id": "esp32_aa11bb", "actuator_type": "led", "action": "on"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "device-offline");

    // Bus not ready.
    h.publish("devices/esp32_aa11bb/status", json!({"value": "online"}))
        .await;
    h.bus.set_connected(false);
    let err = h
        .call(
            "control_actuator",
            json!({"device_id": "esp32_aa11bb", "actuator_type": "led", "action": "on"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "bus-not-ready");

    // No command reached the bus in any failure case.
    assert!(h.bus.published().is_empty());
}

#[tokio::test]
async fn s5_offline_timeout() {
    let h = Harness::new().await;
    h.announce_device().await;

    let supervisor = Supervisor::new(
        h.registry.clone(),
        h.store.clone(),
        Duration::from_secs(2),
        RetentionConfig::default(),
    );

    tokio::time::sleep(Duration::from_secs(3)).await;
    supervisor.run_timeout_scan().await;

    let devices = h.call("list_devices", json!({})).await.unwrap();
    assert_eq!(devices[0]["is_online"], false);

    let online = h.call("list_devices", json!({"online_only": true})).await.unwrap();
    assert!(online.as_array().unwrap().is_empty());

    let row = h.store.get_device("esp32_aa11bb").await.unwrap().unwrap();
    assert_eq!(row.status, "offline");
}

#[tokio::test]
async fn s6_error_propagation() {
    let h = Harness::new().await;
    h.announce_device().await;
    h.publish(
        "devices/esp32_aa11bb/error",
        json!({
            "device_id": "esp32_aa11bb",
            "timestamp": 1_700_000_100,
            "value": {"error_type": "sensor_fail", "message": "timeout", "severity": 2}
        }),
    )
    .await;

    let alerts = h
        .call(
            "get_alerts",
            json!({"device_id": "esp32_aa11bb", "severity_min": 2}),
        )
        .await
        .unwrap();
    let alerts = alerts.as_array().unwrap();
    assert!(!alerts.is_empty());
    assert_eq!(alerts[0]["error_type"], "sensor_fail");
    assert_eq!(alerts[0]["message"], "timeout");
    assert_eq!(alerts[0]["severity"], 2);

    let info = h
        .call("get_device_info", json!({"device_id": "esp32_aa11bb"}))
        .await
        .unwrap();
    let recent = info["recent_errors"].as_array().unwrap();
    assert!(recent.iter().any(|e| e["error_type"] == "sensor_fail"));
    assert_eq!(info["recent_error_count"], 1);
}

#[tokio::test]
async fn latest_wins_regardless_of_arrival_order() {
    let h = Harness::new().await;
    h.announce_device().await;

    let base = Utc::now().timestamp() - 100;
    // Later reading arrives first.
    h.publish(
        "devices/esp32_aa11bb/sensors/temperature/data",
        json!({"timestamp": base + 20, "value": {"reading": 25.0}}),
    )
    .await;
    h.publish(
        "devices/esp32_aa11bb/sensors/temperature/data",
        json!({"timestamp": base + 10, "value": {"reading": 24.0}}),
    )
    .await;

    let result = h
        .call(
            "read_sensor",
            json!({
                "device_id": "esp32_aa11bb",
                "sensor_type": "temperature",
                "history_minutes": 60
            }),
        )
        .await
        .unwrap();
    // Registry resolves by timestamp; the store preserves both.
    assert_eq!(result["current_value"], 25.0);
    assert_eq!(result["history"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn monotone_capabilities_replacement() {
    let h = Harness::new().await;
    h.announce_device().await;
    h.publish(
        "devices/esp32_aa11bb/capabilities",
        json!({
            "device_id": "esp32_aa11bb",
            "sensors": ["humidity"],
            "actuators": ["relay"]
        }),
    )
    .await;

    let info = h
        .call("get_device_info", json!({"device_id": "esp32_aa11bb"}))
        .await
        .unwrap();
    assert_eq!(info["capabilities"]["sensors"], json!(["humidity"]));
    assert_eq!(info["capabilities"]["actuators"], json!(["relay"]));
    // The persisted snapshot was replaced wholesale too.
    assert_eq!(info["stored_capabilities"]["sensors"], json!(["humidity"]));
}

#[tokio::test]
async fn query_devices_filters_by_capability() {
    let h = Harness::new().await;
    h.announce_device().await;
    h.publish(
        "devices/esp32_cc22dd/capabilities",
        json!({"device_id": "esp32_cc22dd", "sensors": ["humidity"], "actuators": []}),
    )
    .await;

    let result = h
        .call("query_devices", json!({"sensor_type": "temperature"}))
        .await
        .unwrap();
    let devices = result.as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["device_id"], "esp32_aa11bb");

    let with_led = h
        .call("query_devices", json!({"actuator_type": "led"}))
        .await
        .unwrap();
    assert_eq!(with_led.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn read_all_sensors_bulk_snapshot() {
    let h = Harness::new().await;
    h.announce_device().await;
    h.publish(
        "devices/esp32_aa11bb/sensors/temperature/data",
        json!({"timestamp": Utc::now().timestamp(), "value": {"reading": 21.0, "unit": "°C"}}),
    )
    .await;

    let result = h.call("read_all_sensors", json!({})).await.unwrap();
    assert_eq!(result["total_devices"], 1);
    assert_eq!(result["online_devices"], 1);
    assert_eq!(
        result["devices"]["esp32_aa11bb"]["temperature"]["value"],
        21.0
    );

    // Unknown device ids come back as per-device errors, not call failures.
    let partial = h
        .call("read_all_sensors", json!({"device_ids": ["esp32_aa11bb", "ghost"]}))
        .await
        .unwrap();
    assert!(partial["devices"]["ghost"]["error"].is_string());
}

#[tokio::test]
async fn system_status_reports_health() {
    let h = Harness::new().await;
    h.announce_device().await;

    let status = h.call("get_system_status", json!({})).await.unwrap();
    assert_eq!(status["devices_total"], 1);
    assert_eq!(status["devices_online"], 1);
    assert_eq!(status["bus_connected"], true);
    assert_eq!(status["store_accessible"], true);
    assert!(status["uptime_seconds"].as_i64().unwrap() >= 0);
}

#[tokio::test]
async fn device_metrics_flow_through_snapshot() {
    let h = Harness::new().await;
    h.announce_device().await;
    h.publish(
        "devices/esp32_aa11bb/sensors/temperature/data",
        json!({"value": {"reading": 20.0}}),
    )
    .await;

    let supervisor = Supervisor::new(
        h.registry.clone(),
        h.store.clone(),
        Duration::from_secs(60),
        RetentionConfig::default(),
    );
    supervisor.run_metrics_snapshot().await;

    let metrics = h
        .call("get_device_metrics", json!({"device_id": "esp32_aa11bb"}))
        .await
        .unwrap();
    let rows = metrics.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["messages_received"], 1);
}

#[tokio::test]
async fn read_sensor_error_paths() {
    let h = Harness::new().await;
    h.announce_device().await;

    let err = h
        .call(
            "read_sensor",
            json!({"device_id": "ghost", "sensor_type": "temperature"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "device-not-found");

    let err = h
        .call(
            "read_sensor",
            json!({"device_id": "esp32_aa11bb", "sensor_type": "pressure"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "sensor-not-found");
}
