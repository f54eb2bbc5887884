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

//! In-memory device registry.
//!
//! The authoritative "right now" view of the fleet: one entry per device id
//! with the latest reading per sensor, latest state per actuator, the recent
//! error ring and bridge-derived counters. Mutations take the per-entry
//! write path; reads clone a stable projection. No I/O happens under a lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use devicelink_core::{
    ActuatorState, Device, DeviceCapabilities, DeviceError, DeviceMetrics, SensorReading,
};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct DeviceRegistry {
    devices: DashMap<String, Device>,
    metrics: DashMap<String, DeviceMetrics>,
    max_recent_errors: usize,
}

impl DeviceRegistry {
    pub fn new(max_recent_errors: usize) -> Self {
        Self {
            devices: DashMap::new(),
            metrics: DashMap::new(),
            max_recent_errors,
        }
    }

    /// Whether the device has ever been seen this session.
    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Replace a device's capability snapshot. Creates the device on first
    /// sight and marks it online.
    pub fn upsert_capabilities(
        &self,
        device_id: &str,
        caps: DeviceCapabilities,
        now: DateTime<Utc>,
    ) {
        let mut entry = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| Device::new(device_id, now));
        entry.capabilities = caps;
        entry.online = true;
        entry.last_seen = now;
        info!(device_id, "capabilities updated");
    }

    /// Record a sensor reading; the reading with the later timestamp wins
    /// regardless of arrival order.
    pub fn record_sensor_reading(&self, reading: SensorReading, now: DateTime<Utc>) {
        let device_id = reading.device_id.clone();
        let mut entry = self
            .devices
            .entry(device_id.clone())
            .or_insert_with(|| Device::new(&device_id, now));
        entry.last_seen = now;

        let replace = entry
            .sensor_readings
            .get(&reading.sensor_type)
            .map(|current| reading.timestamp >= current.timestamp)
            .unwrap_or(true);
        if replace {
            entry
                .sensor_readings
                .insert(reading.sensor_type.clone(), reading);
        }
        drop(entry);

        self.bump_received(&device_id, now);
    }

    /// Record an actuator state report. Latest-only.
    pub fn record_actuator_state(&self, state: ActuatorState, now: DateTime<Utc>) {
        let device_id = state.device_id.clone();
        let mut entry = self
            .devices
            .entry(device_id.clone())
            .or_insert_with(|| Device::new(&device_id, now));
        entry.last_seen = now;
        entry
            .actuator_states
            .insert(state.actuator_type.clone(), state);
        drop(entry);

        self.bump_received(&device_id, now);
    }

    /// Append to the device's bounded error ring.
    pub fn record_error(&self, error: DeviceError, now: DateTime<Utc>) {
        let device_id = error.device_id.clone();
        let error_type = error.error_type.clone();
        let mut entry = self
            .devices
            .entry(device_id.clone())
            .or_insert_with(|| Device::new(&device_id, now));
        entry.last_seen = now;
        entry.push_error(error, self.max_recent_errors);
        drop(entry);

        let mut metrics = self
            .metrics
            .entry(device_id.clone())
            .or_insert_with(|| DeviceMetrics::new(now));
        match error_type.as_str() {
            "sensor_error" | "sensor_fail" => metrics.sensor_read_errors += 1,
            "connection_error" => metrics.connection_failures += 1,
            _ => {}
        }
        metrics.last_activity = now;
        warn!(device_id, error_type, "device error recorded");
    }

    /// Flip the online flag. Going online refreshes last-seen.
    pub fn set_status(&self, device_id: &str, online: bool, now: DateTime<Utc>) {
        let mut entry = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| Device::new(device_id, now));
        let was_online = entry.online;
        entry.online = online;
        if online {
            entry.last_seen = now;
        }
        if was_online != online {
            info!(device_id, online, "device status changed");
        }
    }

    /// Count an outbound command toward the device's metrics.
    pub fn increment_sent(&self, device_id: &str, now: DateTime<Utc>) {
        let mut metrics = self
            .metrics
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceMetrics::new(now));
        metrics.messages_sent += 1;
        metrics.last_activity = now;
    }

    /// Mark silent online devices offline and return their ids. Single pass.
    pub fn scan_timeouts(&self, timeout: Duration, now: DateTime<Utc>) -> Vec<String> {
        let threshold = chrono::Duration::from_std(timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let mut flipped = Vec::new();
        for mut entry in self.devices.iter_mut() {
            if entry.online && now - entry.last_seen > threshold {
                entry.online = false;
                flipped.push(entry.device_id.clone());
                warn!(device_id = %entry.device_id, "device marked offline (timeout)");
            }
        }
        flipped
    }

    /// A stable snapshot of one device.
    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.devices.get(device_id).map(|d| d.clone())
    }

    /// All devices, optionally only the online ones.
    pub fn list(&self, online_only: bool) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|d| !online_only || d.online)
            .map(|d| d.clone())
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// Devices advertising the given sensor and/or actuator.
    pub fn filter_by_capability(
        &self,
        sensor_type: Option<&str>,
        actuator_type: Option<&str>,
        online_only: bool,
    ) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|d| !online_only || d.online)
            .filter(|d| sensor_type.map(|s| d.has_sensor(s)).unwrap_or(true))
            .filter(|d| actuator_type.map(|a| d.has_actuator(a)).unwrap_or(true))
            .map(|d| d.clone())
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// Bridge-derived counters for one device.
    pub fn get_metrics(&self, device_id: &str) -> Option<DeviceMetrics> {
        self.metrics.get(device_id).map(|m| m.clone())
    }

    /// All counters, for the supervisor's periodic snapshot.
    pub fn metrics_snapshot(&self) -> Vec<(String, DeviceMetrics)> {
        self.metrics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// (total, online) device counts.
    pub fn counts(&self) -> (usize, usize) {
        let total = self.devices.len();
        let online = self.devices.iter().filter(|d| d.online).count();
        (total, online)
    }

    fn bump_received(&self, device_id: &str, now: DateTime<Utc>) {
        let mut metrics = self
            .metrics
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceMetrics::new(now));
        metrics.messages_received += 1;
        metrics.last_activity = now;
        debug!(device_id, received = metrics.messages_received, "message counted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use devicelink_core::Severity;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn reading(device: &str, sensor: &str, value: f64, at: i64) -> SensorReading {
        SensorReading {
            device_id: device.into(),
            sensor_type: sensor.into(),
            value,
            unit: Some("°C".into()),
            quality: Some(100.0),
            timestamp: ts(at),
        }
    }

    #[test]
    fn test_first_sight_creates_device() {
        let registry = DeviceRegistry::new(100);
        assert!(!registry.contains("d1"));
        registry.record_sensor_reading(reading("d1", "temperature", 23.5, 100), ts(100));
        assert!(registry.contains("d1"));
        let device = registry.get("d1").unwrap();
        assert_eq!(device.sensor_readings["temperature"].value, 23.5);
        // First sight via telemetry does not imply online.
        assert!(!device.online);
    }

    #[test]
    fn test_latest_wins_regardless_of_arrival_order() {
        let registry = DeviceRegistry::new(100);
        registry.record_sensor_reading(reading("d1", "t", 2.0, 200), ts(500));
        registry.record_sensor_reading(reading("d1", "t", 1.0, 100), ts(501));
        let device = registry.get("d1").unwrap();
        assert_eq!(device.sensor_readings["t"].value, 2.0);

        // A genuinely newer reading replaces.
        registry.record_sensor_reading(reading("d1", "t", 3.0, 300), ts(502));
        assert_eq!(registry.get("d1").unwrap().sensor_readings["t"].value, 3.0);
    }

    #[test]
    fn test_capabilities_snapshot_fully_replaces() {
        let registry = DeviceRegistry::new(100);
        registry.upsert_capabilities(
            "d1",
            DeviceCapabilities {
                sensors: vec!["temperature".into(), "humidity".into()],
                ..Default::default()
            },
            ts(0),
        );
        registry.upsert_capabilities(
            "d1",
            DeviceCapabilities {
                sensors: vec!["pressure".into()],
                ..Default::default()
            },
            ts(10),
        );
        let device = registry.get("d1").unwrap();
        assert_eq!(device.capabilities.sensors, vec!["pressure"]);
        assert!(device.online);
    }

    #[test]
    fn test_error_ring_bound_and_order() {
        let registry = DeviceRegistry::new(3);
        for i in 0..5 {
            registry.record_error(
                DeviceError {
                    device_id: "d1".into(),
                    error_type: "misc".into(),
                    message: format!("e{i}"),
                    severity: Severity::Error,
                    timestamp: ts(i),
                },
                ts(i),
            );
        }
        let device = registry.get("d1").unwrap();
        assert_eq!(device.errors.len(), 3);
        let messages: Vec<&str> = device.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["e2", "e3", "e4"]);
    }

    #[test]
    fn test_error_types_feed_counters() {
        let registry = DeviceRegistry::new(10);
        for error_type in ["sensor_error", "connection_error", "other"] {
            registry.record_error(
                DeviceError {
                    device_id: "d1".into(),
                    error_type: error_type.into(),
                    message: String::new(),
                    severity: Severity::Warn,
                    timestamp: ts(0),
                },
                ts(0),
            );
        }
        let metrics = registry.get_metrics("d1").unwrap();
        assert_eq!(metrics.sensor_read_errors, 1);
        assert_eq!(metrics.connection_failures, 1);
    }

    #[test]
    fn test_scan_timeouts_flips_silent_devices() {
        let registry = DeviceRegistry::new(100);
        registry.upsert_capabilities("quiet", DeviceCapabilities::default(), ts(0));
        registry.upsert_capabilities("chatty", DeviceCapabilities::default(), ts(0));
        registry.record_sensor_reading(reading("chatty", "t", 1.0, 90), ts(90));

        let flipped = registry.scan_timeouts(Duration::from_secs(60), ts(120));
        assert_eq!(flipped, vec!["quiet".to_string()]);
        assert!(!registry.get("quiet").unwrap().online);
        assert!(registry.get("chatty").unwrap().online);

        // Already-offline devices are not reported again.
        let again = registry.scan_timeouts(Duration::from_secs(60), ts(121));
        assert!(again.is_empty());
    }

    #[test]
    fn test_list_and_capability_filters() {
        let registry = DeviceRegistry::new(100);
        registry.upsert_capabilities(
            "a",
            DeviceCapabilities {
                sensors: vec!["temperature".into()],
                actuators: vec!["led".into()],
                ..Default::default()
            },
            ts(0),
        );
        registry.upsert_capabilities(
            "b",
            DeviceCapabilities {
                sensors: vec!["humidity".into()],
                ..Default::default()
            },
            ts(0),
        );
        registry.set_status("b", false, ts(1));

        assert_eq!(registry.list(false).len(), 2);
        let online = registry.list(true);
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].device_id, "a");

        let with_led = registry.filter_by_capability(None, Some("led"), false);
        assert_eq!(with_led.len(), 1);
        assert_eq!(with_led[0].device_id, "a");

        let temp_online = registry.filter_by_capability(Some("temperature"), None, true);
        assert_eq!(temp_online.len(), 1);
    }

    #[test]
    fn test_status_online_refreshes_last_seen() {
        let registry = DeviceRegistry::new(100);
        registry.set_status("d1", true, ts(100));
        assert_eq!(registry.get("d1").unwrap().last_seen, ts(100));
        // Going offline keeps the old last_seen.
        registry.set_status("d1", false, ts(200));
        assert_eq!(registry.get("d1").unwrap().last_seen, ts(100));
    }

    #[test]
    fn test_counts() {
        let registry = DeviceRegistry::new(100);
        registry.set_status("a", true, ts(0));
        registry.set_status("b", false, ts(0));
        assert_eq!(registry.counts(), (2, 1));
    }
}
