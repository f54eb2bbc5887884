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

//! Message router
//!
//! Owns one handler per consumed topic pattern. Patterns are checked in
//! insertion order, first match wins. Handlers parse the payload, update
//! the registry, then persist; a store failure is logged and never undoes
//! the registry update. Per-message errors are swallowed here; a bad
//! payload must not take the process down.

use crate::bus::BusMessage;
use crate::registry::DeviceRegistry;
use chrono::Utc;
use devicelink_core::{
    payload::wire_timestamp, ActuatorState, CapabilitiesPayload, DeviceError, DeviceStatusPayload,
    ErrorPayload, SensorDataPayload, SensorReading, TopicFilter, ValuePayload,
};
use devicelink_storage::{DeviceRegistration, Store};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
enum Route {
    SensorData,
    ActuatorStatus,
    Capabilities,
    DeviceStatus,
    DeviceError,
}

/// Counters exposed on the status surface.
#[derive(Debug, Default)]
pub struct RouterCounters {
    pub handled: AtomicU64,
    pub parse_errors: AtomicU64,
    pub unmatched: AtomicU64,
}

pub struct MessageRouter {
    registry: Arc<DeviceRegistry>,
    store: Arc<Store>,
    routes: Vec<(TopicFilter, Route)>,
    pub counters: RouterCounters,
}

impl MessageRouter {
    pub fn new(registry: Arc<DeviceRegistry>, store: Arc<Store>) -> Self {
        let table = [
            ("devices/+/sensors/+/data", Route::SensorData),
            ("devices/+/actuators/+/status", Route::ActuatorStatus),
            ("devices/+/capabilities", Route::Capabilities),
            ("devices/+/status", Route::DeviceStatus),
            ("devices/+/error", Route::DeviceError),
        ];
        let routes = table
            .into_iter()
            .filter_map(|(pattern, route)| TopicFilter::parse(pattern).map(|f| (f, route)))
            .collect();
        Self {
            registry,
            store,
            routes,
            counters: RouterCounters::default(),
        }
    }

    /// Route one decoded bus message to its handler.
    pub async fn dispatch(&self, message: BusMessage) {
        for (filter, route) in &self.routes {
            if let Some(matched) = filter.matches(&message.topic) {
                self.counters.handled.fetch_add(1, Ordering::Relaxed);
                match route {
                    Route::SensorData => {
                        self.handle_sensor_data(
                            &matched.wildcards[0],
                            &matched.wildcards[1],
                            message.payload,
                        )
                        .await
                    }
                    Route::ActuatorStatus => {
                        self.handle_actuator_status(
                            &matched.wildcards[0],
                            &matched.wildcards[1],
                            message.payload,
                        )
                        .await
                    }
                    Route::Capabilities => {
                        self.handle_capabilities(&matched.wildcards[0], message.payload)
                            .await
                    }
                    Route::DeviceStatus => {
                        self.handle_device_status(&matched.wildcards[0], message.payload)
                            .await
                    }
                    Route::DeviceError => {
                        self.handle_device_error(&matched.wildcards[0], message.payload)
                            .await
                    }
                }
                return;
            }
        }
        self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
        debug!(topic = %message.topic, "no route for topic");
    }

    async fn handle_sensor_data(
        &self,
        device_id: &str,
        sensor_type: &str,
        payload: serde_json::Value,
    ) {
        let parsed: SensorDataPayload = match serde_json::from_value(payload) {
            Ok(p) => p,
            Err(e) => return self.parse_error(device_id, "sensor data", e),
        };

        let now = Utc::now();
        let reading = SensorReading {
            device_id: device_id.to_string(),
            sensor_type: sensor_type.to_string(),
            value: parsed.value.reading(),
            unit: parsed.value.unit().map(str::to_string),
            quality: parsed.value.quality(),
            timestamp: wire_timestamp(parsed.timestamp, now),
        };

        let first_sight = !self.registry.contains(device_id);
        self.registry.record_sensor_reading(reading.clone(), now);

        // Catalog row must exist before the first time-series insert.
        if first_sight {
            let registration = DeviceRegistration::new(device_id, now);
            if let Err(e) = self.store.register_device(&registration).await {
                warn!(device_id, error = %e, "catalog backfill failed");
                return;
            }
        }
        if let Err(e) = self.store.store_sensor_data(&reading).await {
            warn!(device_id, sensor_type, error = %e, "sensor persist failed");
        }
    }

    async fn handle_actuator_status(
        &self,
        device_id: &str,
        actuator_type: &str,
        payload: serde_json::Value,
    ) {
        let parsed: ValuePayload = match serde_json::from_value(payload) {
            Ok(p) => p,
            Err(e) => return self.parse_error(device_id, "actuator status", e),
        };

        let now = Utc::now();
        let state = ActuatorState {
            device_id: device_id.to_string(),
            actuator_type: actuator_type.to_string(),
            state: parsed.value,
            timestamp: wire_timestamp(parsed.timestamp, now),
        };
        self.registry.record_actuator_state(state, now);
    }

    async fn handle_capabilities(&self, device_id: &str, payload: serde_json::Value) {
        let parsed: CapabilitiesPayload = match serde_json::from_value(payload) {
            Ok(p) => p,
            Err(e) => return self.parse_error(device_id, "capabilities", e),
        };

        let now = Utc::now();
        let caps = parsed.to_capabilities();
        self.registry
            .upsert_capabilities(device_id, caps.clone(), now);

        if let Err(e) = self.store.upsert_capabilities(device_id, &caps, now).await {
            warn!(device_id, error = %e, "capabilities persist failed");
        }

        // Backfill the main catalog so queries see the device even after
        // a restart.
        let mut registration = DeviceRegistration::new(device_id, now);
        registration.device_type = parsed.device_type.clone();
        registration.sensors = caps.sensors.clone();
        registration.actuators = caps.actuators.clone();
        registration.firmware_version = caps.firmware_version.clone();
        registration.location = parsed.location.clone();
        registration.status = "online".to_string();
        if let Err(e) = self.store.register_device(&registration).await {
            warn!(device_id, error = %e, "catalog upsert failed");
        }
    }

    async fn handle_device_status(&self, device_id: &str, payload: serde_json::Value) {
        let parsed: DeviceStatusPayload = match serde_json::from_value(payload) {
            Ok(p) => p,
            Err(e) => return self.parse_error(device_id, "status", e),
        };

        let now = Utc::now();
        self.registry.set_status(device_id, parsed.is_online(), now);
        if let Err(e) = self
            .store
            .update_device_status_text(device_id, &parsed.value, now)
            .await
        {
            warn!(device_id, error = %e, "status persist failed");
        }
    }

    async fn handle_device_error(&self, device_id: &str, payload: serde_json::Value) {
        let parsed: ErrorPayload = match serde_json::from_value(payload) {
            Ok(p) => p,
            Err(e) => return self.parse_error(device_id, "error", e),
        };

        let now = Utc::now();
        let details = parsed.details();
        let error = DeviceError {
            device_id: device_id.to_string(),
            error_type: details.error_type.clone(),
            message: details.message.clone(),
            severity: details.severity(),
            timestamp: wire_timestamp(parsed.timestamp(), now),
        };

        self.registry.record_error(error.clone(), now);
        if let Err(e) = self.store.log_device_error(&error).await {
            warn!(device_id, error = %e, "error persist failed");
        }
    }

    fn parse_error(&self, device_id: &str, kind: &str, err: serde_json::Error) {
        self.counters.parse_errors.fetch_add(1, Ordering::Relaxed);
        warn!(device_id, kind, error = %err, "dropping malformed payload");
    }
}

/// Spawn the bounded worker pool draining the bus ingress channel. Workers
/// exit when the channel closes or shutdown is signalled.
pub fn spawn_workers(
    router: Arc<MessageRouter>,
    ingress: mpsc::Receiver<BusMessage>,
    workers: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let ingress = Arc::new(Mutex::new(ingress));
    (0..workers.max(1))
        .map(|worker| {
            let router = router.clone();
            let ingress = ingress.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let message = {
                        let mut guard = ingress.lock().await;
                        tokio::select! {
                            message = guard.recv() => message,
                            _ = shutdown.changed() => None,
                        }
                    };
                    match message {
                        Some(message) => router.dispatch(message).await,
                        None => break,
                    }
                }
                debug!(worker, "router worker stopped");
            })
        })
        .collect()
}
