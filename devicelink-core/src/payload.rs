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

//! Bus payload shapes
//!
//! Every message on the bus is a UTF-8 JSON object. Sensor data arrives in
//! two historical shapes: the rich `{"value": {"reading": ..}}` form emitted
//! by current firmware and a legacy flat `{"value": <number>}` form. Both
//! decode into the same internal reading; the bridge itself only ever emits
//! the rich form.

use crate::device::{DeviceCapabilities, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Convert a wire timestamp (unix seconds, possibly fractional) into an
/// absolute UTC instant. Absent or non-finite values fall back to `ingested_at`.
pub fn wire_timestamp(secs: Option<f64>, ingested_at: DateTime<Utc>) -> DateTime<Utc> {
    match secs {
        Some(s) if s.is_finite() && s >= 0.0 => {
            DateTime::<Utc>::from_timestamp_millis((s * 1000.0) as i64).unwrap_or(ingested_at)
        }
        _ => ingested_at,
    }
}

/// The `value` field of a sensor data message: a record for current
/// firmware, a bare number for the legacy shape.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SensorValue {
    Rich {
        reading: f64,
        #[serde(default)]
        unit: Option<String>,
        #[serde(default)]
        quality: Option<f64>,
    },
    Scalar(f64),
}

impl SensorValue {
    pub fn reading(&self) -> f64 {
        match self {
            SensorValue::Rich { reading, .. } => *reading,
            SensorValue::Scalar(v) => *v,
        }
    }

    pub fn unit(&self) -> Option<&str> {
        match self {
            SensorValue::Rich { unit, .. } => unit.as_deref(),
            SensorValue::Scalar(_) => None,
        }
    }

    pub fn quality(&self) -> Option<f64> {
        match self {
            SensorValue::Rich { quality, .. } => *quality,
            SensorValue::Scalar(_) => None,
        }
    }
}

/// Payload on `devices/{id}/sensors/{name}/data`.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorDataPayload {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<f64>,
    pub value: SensorValue,
}

/// Payload on `devices/{id}/actuators/{name}/status`. The value is kept
/// verbatim; devices report strings, numbers or small objects.
#[derive(Debug, Clone, Deserialize)]
pub struct ValuePayload {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<f64>,
    pub value: serde_json::Value,
}

/// Payload on `devices/{id}/status`. Values other than "online"/"offline"
/// are accepted and stored verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceStatusPayload {
    pub value: String,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

impl DeviceStatusPayload {
    pub fn is_online(&self) -> bool {
        self.value == "online"
    }
}

/// The error description carried by an error message.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ErrorDetails {
    pub error_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub severity: Option<i64>,
}

impl ErrorDetails {
    /// Reported severity, defaulting to `Error` when absent.
    pub fn severity(&self) -> Severity {
        self.severity.map(Severity::from_level).unwrap_or(Severity::Error)
    }
}

/// Payload on `devices/{id}/error`: either the enveloped
/// `{"value": {"error_type": ..}}` form or the flat legacy form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Nested {
        #[serde(default)]
        device_id: Option<String>,
        #[serde(default)]
        timestamp: Option<f64>,
        value: ErrorDetails,
    },
    Flat {
        #[serde(default)]
        device_id: Option<String>,
        #[serde(default)]
        timestamp: Option<f64>,
        #[serde(flatten)]
        details: ErrorDetails,
    },
}

impl ErrorPayload {
    pub fn details(&self) -> &ErrorDetails {
        match self {
            ErrorPayload::Nested { value, .. } => value,
            ErrorPayload::Flat { details, .. } => details,
        }
    }

    pub fn timestamp(&self) -> Option<f64> {
        match self {
            ErrorPayload::Nested { timestamp, .. } | ErrorPayload::Flat { timestamp, .. } => {
                *timestamp
            }
        }
    }
}

/// Payload on `devices/{id}/capabilities` (retained by the broker).
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilitiesPayload {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub hardware_version: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub sensors: Vec<String>,
    #[serde(default)]
    pub actuators: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CapabilitiesPayload {
    pub fn to_capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            sensors: self.sensors.clone(),
            actuators: self.actuators.clone(),
            metadata: self.metadata.clone(),
            firmware_version: self.firmware_version.clone(),
            hardware_version: self.hardware_version.clone(),
        }
    }
}

/// Command published by the bridge on `devices/{id}/actuators/{name}/cmd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPayload {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Unix seconds at the moment the command was issued.
    pub timestamp: f64,
}
