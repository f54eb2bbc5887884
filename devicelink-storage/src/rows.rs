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

//! Row projections returned by store queries.

use chrono::{DateTime, Utc};
use serde::Serialize;

fn ms_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

/// A row of the `devices` catalog.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeviceRow {
    pub device_id: String,
    pub device_type: Option<String>,
    pub sensors_json: Option<String>,
    pub actuators_json: Option<String>,
    pub firmware_version: Option<String>,
    pub location: Option<String>,
    pub status: String,
    #[sqlx(rename = "last_seen")]
    pub last_seen_ms: Option<i64>,
    #[sqlx(rename = "created_at")]
    pub created_at_ms: i64,
}

/// A persisted sensor sample.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SensorDataRow {
    pub device_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: Option<String>,
    pub quality: Option<f64>,
    #[sqlx(rename = "timestamp")]
    pub timestamp_ms: i64,
}

impl SensorDataRow {
    pub fn timestamp(&self) -> DateTime<Utc> {
        ms_to_utc(self.timestamp_ms)
    }
}

/// A persisted device error.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeviceErrorRow {
    pub device_id: String,
    pub error_type: String,
    pub message: String,
    pub severity: i64,
    #[sqlx(rename = "timestamp")]
    pub timestamp_ms: i64,
}

impl DeviceErrorRow {
    pub fn timestamp(&self) -> DateTime<Utc> {
        ms_to_utc(self.timestamp_ms)
    }
}

/// The latest capability snapshot for a device.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CapabilitiesRow {
    pub device_id: String,
    pub sensors_json: String,
    pub actuators_json: String,
    pub metadata_json: String,
    pub firmware_version: Option<String>,
    pub hardware_version: Option<String>,
    #[sqlx(rename = "last_updated")]
    pub last_updated_ms: i64,
}

/// A bridge-derived metrics snapshot.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeviceMetricsRow {
    pub device_id: String,
    pub messages_sent: i64,
    pub messages_received: i64,
    pub connection_failures: i64,
    pub sensor_read_errors: i64,
    #[sqlx(rename = "last_activity")]
    pub last_activity_ms: i64,
    #[sqlx(rename = "uptime_start")]
    pub uptime_start_ms: i64,
}

/// Counts of rows removed by a retention sweep.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CleanupReport {
    pub sensor_rows_deleted: u64,
    pub error_rows_deleted: u64,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.sensor_rows_deleted + self.error_rows_deleted
    }
}

/// Database statistics for the system status surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub devices: i64,
    pub sensor_data: i64,
    pub device_errors: i64,
    pub device_capabilities: i64,
    pub device_metrics: i64,
    pub size_bytes: i64,
}
