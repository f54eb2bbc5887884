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

//! Device model
//!
//! The in-memory representation of a fleet device: its self-declared
//! capabilities, latest sensor readings and actuator states, the recent
//! error ring and bridge-derived traffic counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Error severity reported by devices. Wire encoding is the numeric level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info = 0,
    Warn = 1,
    Error = 2,
    Critical = 3,
}

impl Severity {
    /// Clamp an arbitrary numeric level into the supported range.
    pub fn from_level(level: i64) -> Self {
        match level {
            i64::MIN..=0 => Severity::Info,
            1 => Severity::Warn,
            2 => Severity::Error,
            _ => Severity::Critical,
        }
    }

    pub fn level(self) -> i64 {
        self as i64
    }
}

impl Serialize for Severity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.level())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let level = i64::deserialize(deserializer)?;
        Ok(Severity::from_level(level))
    }
}

/// A single scalar sensor measurement. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorReading {
    pub device_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: Option<String>,
    /// Quality score in `[0, 100]` when the device reports one.
    pub quality: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Latest-only actuator state. The value is free-form (string or number),
/// exactly as the device reported it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActuatorState {
    pub device_id: String,
    pub actuator_type: String,
    pub state: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// An error reported by a device on its error topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceError {
    pub device_id: String,
    pub error_type: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Self-declared sensor/actuator inventory. A later snapshot fully replaces
/// an earlier one; there is no per-field merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceCapabilities {
    #[serde(default)]
    pub sensors: Vec<String>,
    #[serde(default)]
    pub actuators: Vec<String>,
    /// Per-sensor/actuator metadata blob (units, ranges, ...).
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub firmware_version: Option<String>,
    pub hardware_version: Option<String>,
}

/// Bridge-derived traffic counters for one device. Reset on process restart;
/// periodically snapshotted to storage by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceMetrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub connection_failures: u64,
    pub sensor_read_errors: u64,
    pub last_activity: DateTime<Utc>,
    pub uptime_start: DateTime<Utc>,
}

impl DeviceMetrics {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            messages_sent: 0,
            messages_received: 0,
            connection_failures: 0,
            sensor_read_errors: 0,
            last_activity: now,
            uptime_start: now,
        }
    }

    pub fn uptime_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.uptime_start).num_seconds().max(0)
    }
}

/// A known fleet device and its last observed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub capabilities: DeviceCapabilities,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    /// Latest reading per sensor name.
    pub sensor_readings: HashMap<String, SensorReading>,
    /// Latest state per actuator name.
    pub actuator_states: HashMap<String, ActuatorState>,
    /// Bounded ring of recent errors, oldest evicted first.
    pub errors: VecDeque<DeviceError>,
}

impl Device {
    pub fn new(device_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            capabilities: DeviceCapabilities::default(),
            online: false,
            last_seen: now,
            sensor_readings: HashMap::new(),
            actuator_states: HashMap::new(),
            errors: VecDeque::new(),
        }
    }

    /// Whether the device advertised a sensor with this name.
    pub fn has_sensor(&self, sensor_type: &str) -> bool {
        self.capabilities.sensors.iter().any(|s| s == sensor_type)
    }

    /// Whether the device advertised an actuator with this name.
    pub fn has_actuator(&self, actuator_type: &str) -> bool {
        self.capabilities
            .actuators
            .iter()
            .any(|a| a == actuator_type)
    }

    /// Append an error, evicting the oldest entries beyond `max_errors`.
    pub fn push_error(&mut self, error: DeviceError, max_errors: usize) {
        self.errors.push_back(error);
        while self.errors.len() > max_errors {
            self.errors.pop_front();
        }
    }
}
