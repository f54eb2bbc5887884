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

//! The embedded store.
//!
//! One `Store` wraps a small SQLite connection pool. Writes are single
//! statements; retention runs as bounded-batch deletes so readers stay
//! responsive during the sweep.

use crate::error::{is_busy, StoreError};
use crate::rows::{
    CapabilitiesRow, CleanupReport, DeviceErrorRow, DeviceMetricsRow, DeviceRow, SensorDataRow,
    StoreStats,
};
use chrono::{DateTime, Utc};
use devicelink_core::{DeviceCapabilities, DeviceError, DeviceMetrics, SensorReading};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Transient-busy retry budget.
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Rows deleted per retention batch. Keeps write locks short.
const CLEANUP_BATCH: i64 = 1000;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS devices (
        device_id TEXT PRIMARY KEY,
        device_type TEXT,
        sensors_json TEXT,
        actuators_json TEXT,
        firmware_version TEXT,
        location TEXT,
        status TEXT NOT NULL DEFAULT 'offline',
        last_seen INTEGER,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sensor_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id TEXT NOT NULL,
        sensor_type TEXT NOT NULL,
        value REAL NOT NULL,
        unit TEXT,
        quality REAL,
        timestamp INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (device_id) REFERENCES devices(device_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_sensor_device_type_ts
        ON sensor_data(device_id, sensor_type, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_sensor_ts ON sensor_data(timestamp)",
    "CREATE TABLE IF NOT EXISTS device_errors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id TEXT NOT NULL,
        error_type TEXT NOT NULL,
        message TEXT,
        severity INTEGER NOT NULL DEFAULT 1,
        timestamp INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (device_id) REFERENCES devices(device_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_error_device_ts
        ON device_errors(device_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_error_ts ON device_errors(timestamp)",
    "CREATE TABLE IF NOT EXISTS device_capabilities (
        device_id TEXT PRIMARY KEY,
        sensors_json TEXT NOT NULL,
        actuators_json TEXT NOT NULL,
        metadata_json TEXT NOT NULL,
        firmware_version TEXT,
        hardware_version TEXT,
        last_updated INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS device_metrics (
        device_id TEXT PRIMARY KEY,
        messages_sent INTEGER NOT NULL DEFAULT 0,
        messages_received INTEGER NOT NULL DEFAULT 0,
        connection_failures INTEGER NOT NULL DEFAULT 0,
        sensor_read_errors INTEGER NOT NULL DEFAULT 0,
        last_activity INTEGER NOT NULL,
        uptime_start INTEGER NOT NULL,
        last_updated INTEGER NOT NULL
    )",
];

/// Catalog upsert input for [`Store::register_device`].
#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    pub device_id: String,
    pub device_type: Option<String>,
    pub sensors: Vec<String>,
    pub actuators: Vec<String>,
    pub firmware_version: Option<String>,
    pub location: Option<String>,
    pub status: String,
    pub last_seen: DateTime<Utc>,
}

impl DeviceRegistration {
    pub fn new(device_id: impl Into<String>, last_seen: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            device_type: None,
            sensors: Vec::new(),
            actuators: Vec::new(),
            firmware_version: None,
            location: None,
            status: "offline".to_string(),
            last_seen,
        }
    }
}

/// Filter for [`Store::get_device_errors`].
#[derive(Debug, Clone)]
pub struct ErrorQuery {
    pub device_id: Option<String>,
    pub min_severity: Option<i64>,
    pub since_minutes: Option<i64>,
    pub limit: i64,
}

impl Default for ErrorQuery {
    fn default() -> Self {
        Self {
            device_id: None,
            min_severity: None,
            since_minutes: None,
            limit: 500,
        }
    }
}

/// Durable catalog, time-series and metrics store.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database file and initialize the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::InvalidArgument(format!("db directory: {e}")))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        info!(path = %path.display(), "store opened");
        Ok(Self { pool })
    }

    /// Close the pool, flushing WAL state.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Upsert a device into the catalog, preserving `created_at`.
    pub async fn register_device(&self, reg: &DeviceRegistration) -> Result<(), StoreError> {
        if reg.device_id.is_empty() {
            return Err(StoreError::InvalidArgument("empty device_id".into()));
        }
        let sensors_json = serde_json::to_string(&reg.sensors).unwrap_or_else(|_| "[]".into());
        let actuators_json = serde_json::to_string(&reg.actuators).unwrap_or_else(|_| "[]".into());
        let now_ms = Utc::now().timestamp_millis();

        self.with_retry(|| async {
            sqlx::query(
                "INSERT INTO devices
                    (device_id, device_type, sensors_json, actuators_json,
                     firmware_version, location, status, last_seen, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(device_id) DO UPDATE SET
                    device_type = excluded.device_type,
                    sensors_json = excluded.sensors_json,
                    actuators_json = excluded.actuators_json,
                    firmware_version = excluded.firmware_version,
                    location = excluded.location,
                    status = excluded.status,
                    last_seen = excluded.last_seen",
            )
            .bind(&reg.device_id)
            .bind(&reg.device_type)
            .bind(&sensors_json)
            .bind(&actuators_json)
            .bind(&reg.firmware_version)
            .bind(&reg.location)
            .bind(&reg.status)
            .bind(reg.last_seen.timestamp_millis())
            .bind(now_ms)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    /// Upsert the online flag and last-seen instant. Never deletes rows.
    pub async fn update_device_status(
        &self,
        device_id: &str,
        online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let status = if online { "online" } else { "offline" };
        self.update_device_status_text(device_id, status, last_seen)
            .await
    }

    /// Upsert the status column verbatim. Devices occasionally report
    /// states beyond online/offline; those are kept as-is.
    pub async fn update_device_status_text(
        &self,
        device_id: &str,
        status: &str,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if device_id.is_empty() {
            return Err(StoreError::InvalidArgument("empty device_id".into()));
        }
        let now_ms = Utc::now().timestamp_millis();

        self.with_retry(|| async {
            sqlx::query(
                "INSERT INTO devices (device_id, status, last_seen, created_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(device_id) DO UPDATE SET
                    status = excluded.status,
                    last_seen = excluded.last_seen",
            )
            .bind(device_id)
            .bind(status)
            .bind(last_seen.timestamp_millis())
            .bind(now_ms)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    /// Append one sensor sample. Timestamps need not be monotonic.
    pub async fn store_sensor_data(&self, reading: &SensorReading) -> Result<(), StoreError> {
        if reading.device_id.is_empty() || reading.sensor_type.is_empty() {
            return Err(StoreError::InvalidArgument(
                "empty device_id or sensor_type".into(),
            ));
        }
        if !reading.value.is_finite() {
            return Err(StoreError::InvalidArgument("non-finite value".into()));
        }
        let now_ms = Utc::now().timestamp_millis();

        self.with_retry(|| async {
            sqlx::query(
                "INSERT INTO sensor_data
                    (device_id, sensor_type, value, unit, quality, timestamp, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&reading.device_id)
            .bind(&reading.sensor_type)
            .bind(reading.value)
            .bind(&reading.unit)
            .bind(reading.quality)
            .bind(reading.timestamp.timestamp_millis())
            .bind(now_ms)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    /// Samples for one (device, sensor) within the last `since_minutes`,
    /// newest first, capped at `limit`.
    pub async fn get_sensor_data(
        &self,
        device_id: &str,
        sensor_type: &str,
        since_minutes: i64,
        limit: i64,
    ) -> Result<Vec<SensorDataRow>, StoreError> {
        let since_ms = Utc::now().timestamp_millis() - since_minutes.max(0) * 60_000;

        self.with_retry(|| async {
            sqlx::query_as::<_, SensorDataRow>(
                "SELECT device_id, sensor_type, value, unit, quality, timestamp
                 FROM sensor_data
                 WHERE device_id = ? AND sensor_type = ? AND timestamp > ?
                 ORDER BY timestamp DESC
                 LIMIT ?",
            )
            .bind(device_id)
            .bind(sensor_type)
            .bind(since_ms)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await
        })
        .await
    }

    /// Append one device error.
    pub async fn log_device_error(&self, error: &DeviceError) -> Result<(), StoreError> {
        if error.device_id.is_empty() {
            return Err(StoreError::InvalidArgument("empty device_id".into()));
        }
        let now_ms = Utc::now().timestamp_millis();

        self.with_retry(|| async {
            sqlx::query(
                "INSERT INTO device_errors
                    (device_id, error_type, message, severity, timestamp, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&error.device_id)
            .bind(&error.error_type)
            .bind(&error.message)
            .bind(error.severity.level())
            .bind(error.timestamp.timestamp_millis())
            .bind(now_ms)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    /// Errors matching the filter, newest first.
    pub async fn get_device_errors(
        &self,
        query: &ErrorQuery,
    ) -> Result<Vec<DeviceErrorRow>, StoreError> {
        let min_severity = query.min_severity.unwrap_or(0);
        let since_ms = match query.since_minutes {
            Some(minutes) => Utc::now().timestamp_millis() - minutes.max(0) * 60_000,
            None => 0,
        };

        self.with_retry(|| async {
            sqlx::query_as::<_, DeviceErrorRow>(
                "SELECT device_id, error_type, message, severity, timestamp
                 FROM device_errors
                 WHERE (? IS NULL OR device_id = ?)
                   AND severity >= ?
                   AND timestamp > ?
                 ORDER BY timestamp DESC
                 LIMIT ?",
            )
            .bind(&query.device_id)
            .bind(&query.device_id)
            .bind(min_severity)
            .bind(since_ms)
            .bind(query.limit.max(0))
            .fetch_all(&self.pool)
            .await
        })
        .await
    }

    /// Replace the capability snapshot for a device. Latest wins.
    pub async fn upsert_capabilities(
        &self,
        device_id: &str,
        caps: &DeviceCapabilities,
        received_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if device_id.is_empty() {
            return Err(StoreError::InvalidArgument("empty device_id".into()));
        }
        let sensors_json = serde_json::to_string(&caps.sensors).unwrap_or_else(|_| "[]".into());
        let actuators_json = serde_json::to_string(&caps.actuators).unwrap_or_else(|_| "[]".into());
        let metadata_json = serde_json::to_string(&caps.metadata).unwrap_or_else(|_| "{}".into());

        self.with_retry(|| async {
            sqlx::query(
                "INSERT INTO device_capabilities
                    (device_id, sensors_json, actuators_json, metadata_json,
                     firmware_version, hardware_version, last_updated)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(device_id) DO UPDATE SET
                    sensors_json = excluded.sensors_json,
                    actuators_json = excluded.actuators_json,
                    metadata_json = excluded.metadata_json,
                    firmware_version = excluded.firmware_version,
                    hardware_version = excluded.hardware_version,
                    last_updated = excluded.last_updated",
            )
            .bind(device_id)
            .bind(&sensors_json)
            .bind(&actuators_json)
            .bind(&metadata_json)
            .bind(&caps.firmware_version)
            .bind(&caps.hardware_version)
            .bind(received_at.timestamp_millis())
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    /// The latest capability snapshot, if any.
    pub async fn get_capabilities(
        &self,
        device_id: &str,
    ) -> Result<Option<CapabilitiesRow>, StoreError> {
        self.with_retry(|| async {
            sqlx::query_as::<_, CapabilitiesRow>(
                "SELECT device_id, sensors_json, actuators_json, metadata_json,
                        firmware_version, hardware_version, last_updated
                 FROM device_capabilities WHERE device_id = ?",
            )
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
        })
        .await
    }

    /// Overwrite the metrics snapshot for a device.
    pub async fn upsert_metrics(
        &self,
        device_id: &str,
        metrics: &DeviceMetrics,
    ) -> Result<(), StoreError> {
        if device_id.is_empty() {
            return Err(StoreError::InvalidArgument("empty device_id".into()));
        }
        let now_ms = Utc::now().timestamp_millis();

        self.with_retry(|| async {
            sqlx::query(
                "INSERT INTO device_metrics
                    (device_id, messages_sent, messages_received, connection_failures,
                     sensor_read_errors, last_activity, uptime_start, last_updated)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(device_id) DO UPDATE SET
                    messages_sent = excluded.messages_sent,
                    messages_received = excluded.messages_received,
                    connection_failures = excluded.connection_failures,
                    sensor_read_errors = excluded.sensor_read_errors,
                    last_activity = excluded.last_activity,
                    uptime_start = excluded.uptime_start,
                    last_updated = excluded.last_updated",
            )
            .bind(device_id)
            .bind(metrics.messages_sent as i64)
            .bind(metrics.messages_received as i64)
            .bind(metrics.connection_failures as i64)
            .bind(metrics.sensor_read_errors as i64)
            .bind(metrics.last_activity.timestamp_millis())
            .bind(metrics.uptime_start.timestamp_millis())
            .bind(now_ms)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    /// Metrics snapshots, optionally for one device.
    pub async fn get_metrics(
        &self,
        device_id: Option<&str>,
    ) -> Result<Vec<DeviceMetricsRow>, StoreError> {
        self.with_retry(|| async {
            sqlx::query_as::<_, DeviceMetricsRow>(
                "SELECT device_id, messages_sent, messages_received, connection_failures,
                        sensor_read_errors, last_activity, uptime_start
                 FROM device_metrics
                 WHERE (? IS NULL OR device_id = ?)
                 ORDER BY device_id",
            )
            .bind(device_id)
            .bind(device_id)
            .fetch_all(&self.pool)
            .await
        })
        .await
    }

    /// One catalog row, if the device was ever seen.
    pub async fn get_device(&self, device_id: &str) -> Result<Option<DeviceRow>, StoreError> {
        self.with_retry(|| async {
            sqlx::query_as::<_, DeviceRow>(
                "SELECT device_id, device_type, sensors_json, actuators_json,
                        firmware_version, location, status, last_seen, created_at
                 FROM devices WHERE device_id = ?",
            )
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
        })
        .await
    }

    /// Delete time-series and error rows older than the retention windows.
    /// The catalog and capability snapshots are never touched.
    pub async fn cleanup(
        &self,
        sensor_retention_days: i64,
        error_retention_days: i64,
    ) -> Result<CleanupReport, StoreError> {
        if sensor_retention_days <= 0 || error_retention_days <= 0 {
            return Err(StoreError::InvalidArgument(
                "retention must be positive".into(),
            ));
        }
        let now_ms = Utc::now().timestamp_millis();
        let sensor_cutoff = now_ms - sensor_retention_days * 86_400_000;
        let error_cutoff = now_ms - error_retention_days * 86_400_000;

        let mut report = CleanupReport::default();
        report.sensor_rows_deleted = self
            .delete_older_than("sensor_data", sensor_cutoff)
            .await?;
        report.error_rows_deleted = self
            .delete_older_than("device_errors", error_cutoff)
            .await?;

        debug!(
            sensor_rows = report.sensor_rows_deleted,
            error_rows = report.error_rows_deleted,
            "retention sweep complete"
        );
        Ok(report)
    }

    /// Per-table row counts and the database file size.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats::default();
        stats.devices = self.count_rows("devices").await?;
        stats.sensor_data = self.count_rows("sensor_data").await?;
        stats.device_errors = self.count_rows("device_errors").await?;
        stats.device_capabilities = self.count_rows("device_capabilities").await?;
        stats.device_metrics = self.count_rows("device_metrics").await?;

        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await?;
        stats.size_bytes = page_count * page_size;
        Ok(stats)
    }

    async fn count_rows(&self, table: &str) -> Result<i64, StoreError> {
        // Table names come from the fixed schema above, never from input.
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let count = sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn delete_older_than(&self, table: &str, cutoff_ms: i64) -> Result<u64, StoreError> {
        let sql = format!(
            "DELETE FROM {table} WHERE id IN
                (SELECT id FROM {table} WHERE timestamp < ? LIMIT ?)"
        );
        let mut total = 0u64;
        loop {
            let affected = self
                .with_retry(|| async {
                    sqlx::query(&sql)
                        .bind(cutoff_ms)
                        .bind(CLEANUP_BATCH)
                        .execute(&self.pool)
                        .await
                        .map(|r| r.rows_affected())
                })
                .await?;
            total += affected;
            if affected < CLEANUP_BATCH as u64 {
                break;
            }
        }
        Ok(total)
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) && attempt + 1 < RETRY_ATTEMPTS => {
                    attempt += 1;
                    warn!(attempt, error = %e, "store busy, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicelink_core::Severity;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("bridge.db")).await.unwrap();
        (dir, store)
    }

    fn reading(device: &str, sensor: &str, value: f64, ts: DateTime<Utc>) -> SensorReading {
        SensorReading {
            device_id: device.into(),
            sensor_type: sensor.into(),
            value,
            unit: Some("°C".into()),
            quality: Some(100.0),
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn test_register_preserves_created_at() {
        let (_dir, store) = open_store().await;
        let mut reg = DeviceRegistration::new("esp32_aa11bb", Utc::now());
        reg.status = "online".into();
        store.register_device(&reg).await.unwrap();

        let first = store.get_device("esp32_aa11bb").await.unwrap().unwrap();

        reg.firmware_version = Some("1.0.1".into());
        store.register_device(&reg).await.unwrap();
        let second = store.get_device("esp32_aa11bb").await.unwrap().unwrap();

        assert_eq!(first.created_at_ms, second.created_at_ms);
        assert_eq!(second.firmware_version.as_deref(), Some("1.0.1"));
    }

    #[tokio::test]
    async fn test_register_rejects_empty_id() {
        let (_dir, store) = open_store().await;
        let reg = DeviceRegistration::new("", Utc::now());
        assert!(matches!(
            store.register_device(&reg).await,
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_status_upsert_creates_row() {
        let (_dir, store) = open_store().await;
        store
            .update_device_status("ghost", true, Utc::now())
            .await
            .unwrap();
        let row = store.get_device("ghost").await.unwrap().unwrap();
        assert_eq!(row.status, "online");

        store
            .update_device_status("ghost", false, Utc::now())
            .await
            .unwrap();
        let row = store.get_device("ghost").await.unwrap().unwrap();
        assert_eq!(row.status, "offline");
    }

    #[tokio::test]
    async fn test_sensor_history_order_and_limit() {
        let (_dir, store) = open_store().await;
        let base = Utc::now();
        for (i, value) in [23.5, 23.6, 23.7, 23.8, 23.9].into_iter().enumerate() {
            let ts = base - chrono::Duration::seconds(50 - (i as i64) * 10);
            store
                .store_sensor_data(&reading("d1", "temperature", value, ts))
                .await
                .unwrap();
        }

        let rows = store
            .get_sensor_data("d1", "temperature", 60, 1000)
            .await
            .unwrap();
        assert_eq!(rows.len(), 5);
        // Newest first.
        assert_eq!(rows[0].value, 23.9);
        assert_eq!(rows[4].value, 23.5);
        assert!(rows.windows(2).all(|w| w[0].timestamp_ms >= w[1].timestamp_ms));

        let capped = store
            .get_sensor_data("d1", "temperature", 60, 2)
            .await
            .unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].value, 23.9);
    }

    #[tokio::test]
    async fn test_sensor_rejects_non_finite() {
        let (_dir, store) = open_store().await;
        let bad = reading("d1", "temperature", f64::NAN, Utc::now());
        assert!(matches!(
            store.store_sensor_data(&bad).await,
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_error_filters() {
        let (_dir, store) = open_store().await;
        let now = Utc::now();
        for (device, severity) in [("d1", Severity::Warn), ("d1", Severity::Critical), ("d2", Severity::Error)] {
            store
                .log_device_error(&DeviceError {
                    device_id: device.into(),
                    error_type: "sensor_fail".into(),
                    message: "timeout".into(),
                    severity,
                    timestamp: now,
                })
                .await
                .unwrap();
        }

        let all = store.get_device_errors(&ErrorQuery::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let severe = store
            .get_device_errors(&ErrorQuery {
                min_severity: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(severe.len(), 2);

        let d1_only = store
            .get_device_errors(&ErrorQuery {
                device_id: Some("d1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(d1_only.len(), 2);
        assert!(d1_only.iter().all(|r| r.device_id == "d1"));
    }

    #[tokio::test]
    async fn test_capabilities_latest_wins() {
        let (_dir, store) = open_store().await;
        let mut caps = DeviceCapabilities {
            sensors: vec!["temperature".into(), "humidity".into()],
            ..Default::default()
        };
        store
            .upsert_capabilities("d1", &caps, Utc::now())
            .await
            .unwrap();

        caps.sensors = vec!["pressure".into()];
        store
            .upsert_capabilities("d1", &caps, Utc::now())
            .await
            .unwrap();

        let row = store.get_capabilities("d1").await.unwrap().unwrap();
        let sensors: Vec<String> = serde_json::from_str(&row.sensors_json).unwrap();
        // No leftover sensors from the previous snapshot.
        assert_eq!(sensors, vec!["pressure"]);
    }

    #[tokio::test]
    async fn test_metrics_upsert_overwrites() {
        let (_dir, store) = open_store().await;
        let now = Utc::now();
        let mut metrics = DeviceMetrics::new(now);
        metrics.messages_received = 7;
        store.upsert_metrics("d1", &metrics).await.unwrap();

        metrics.messages_received = 11;
        store.upsert_metrics("d1", &metrics).await.unwrap();

        let rows = store.get_metrics(Some("d1")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].messages_received, 11);
    }

    #[tokio::test]
    async fn test_cleanup_respects_window() {
        let (_dir, store) = open_store().await;
        let now = Utc::now();
        let old = now - chrono::Duration::days(40);
        let fresh = now - chrono::Duration::days(2);

        store.store_sensor_data(&reading("d1", "t", 1.0, old)).await.unwrap();
        store.store_sensor_data(&reading("d1", "t", 2.0, fresh)).await.unwrap();
        store
            .log_device_error(&DeviceError {
                device_id: "d1".into(),
                error_type: "x".into(),
                message: "old".into(),
                severity: Severity::Error,
                timestamp: old,
            })
            .await
            .unwrap();

        let report = store.cleanup(30, 30).await.unwrap();
        assert_eq!(report.sensor_rows_deleted, 1);
        assert_eq!(report.error_rows_deleted, 1);

        // The in-window row survives; the catalog keeps its rows.
        let rows = store
            .get_sensor_data("d1", "t", 60 * 24 * 7, 100)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 2.0);
    }

    #[tokio::test]
    async fn test_cleanup_rejects_non_positive_retention() {
        let (_dir, store) = open_store().await;
        assert!(store.cleanup(0, 30).await.is_err());
        assert!(store.cleanup(30, -1).await.is_err());
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let (_dir, store) = open_store().await;
        store
            .register_device(&DeviceRegistration::new("d1", Utc::now()))
            .await
            .unwrap();
        store
            .store_sensor_data(&reading("d1", "t", 1.0, Utc::now()))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.devices, 1);
        assert_eq!(stats.sensor_data, 1);
        assert!(stats.size_bytes > 0);
    }
}
