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

//! Background maintenance loops
//!
//! Three periodic tasks owned by the supervisor: the device timeout scan,
//! the metrics snapshot and the retention sweep. Every loop respects the
//! shutdown signal at its next checkpoint and logs-and-retries on failure;
//! none of them can take the process down.

use crate::config::RetentionConfig;
use crate::registry::DeviceRegistry;
use chrono::Utc;
use devicelink_storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const TIMEOUT_SCAN_INTERVAL: Duration = Duration::from_secs(60);
pub const METRICS_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct Supervisor {
    registry: Arc<DeviceRegistry>,
    store: Arc<Store>,
    device_timeout: Duration,
    retention: RetentionConfig,
}

impl Supervisor {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        store: Arc<Store>,
        device_timeout: Duration,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            registry,
            store,
            device_timeout,
            retention,
        }
    }

    /// Start the three loops. Each exits at its next checkpoint once the
    /// shutdown signal flips.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            self.clone()
                .spawn_loop("timeout-scan", TIMEOUT_SCAN_INTERVAL, shutdown.clone(), |s| {
                    Box::pin(async move { s.run_timeout_scan().await })
                }),
            self.clone()
                .spawn_loop("metrics-snapshot", METRICS_INTERVAL, shutdown.clone(), |s| {
                    Box::pin(async move { s.run_metrics_snapshot().await })
                }),
            self.spawn_loop("retention-cleanup", CLEANUP_INTERVAL, shutdown, |s| {
                Box::pin(async move { s.run_cleanup().await })
            }),
        ]
    }

    fn spawn_loop<F>(
        self: Arc<Self>,
        name: &'static str,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
        body: F,
    ) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> futures::future::BoxFuture<'static, ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => body(self.clone()).await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!(task = name, "maintenance loop stopped");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Flip silent devices offline and persist the transition.
    pub async fn run_timeout_scan(&self) {
        let now = Utc::now();
        let flipped = self.registry.scan_timeouts(self.device_timeout, now);
        for device_id in flipped {
            if let Err(e) = self.store.update_device_status(&device_id, false, now).await {
                error!(device_id, error = %e, "failed to persist offline status");
            }
        }
    }

    /// Persist bridge-derived counters for every device seen this session.
    pub async fn run_metrics_snapshot(&self) {
        for (device_id, metrics) in self.registry.metrics_snapshot() {
            if let Err(e) = self.store.upsert_metrics(&device_id, &metrics).await {
                error!(device_id, error = %e, "failed to persist metrics");
            }
        }
        debug!("metrics snapshot complete");
    }

    /// Run the retention sweep; on failure log and let the next cycle retry.
    pub async fn run_cleanup(&self) {
        match self
            .store
            .cleanup(self.retention.sensor_days, self.retention.error_days)
            .await
        {
            Ok(report) => info!(
                sensor_rows = report.sensor_rows_deleted,
                error_rows = report.error_rows_deleted,
                "retention sweep finished"
            ),
            Err(e) => error!(error = %e, "retention sweep failed, will retry next cycle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicelink_core::{DeviceCapabilities, SensorReading};
    use tempfile::TempDir;

    async fn setup(timeout: Duration) -> (TempDir, Arc<DeviceRegistry>, Arc<Store>, Supervisor) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(dir.path().join("bridge.db")).await.unwrap());
        let registry = Arc::new(DeviceRegistry::new(100));
        let supervisor = Supervisor::new(
            registry.clone(),
            store.clone(),
            timeout,
            RetentionConfig::default(),
        );
        (dir, registry, store, supervisor)
    }

    #[tokio::test]
    async fn test_timeout_scan_persists_offline() {
        let (_dir, registry, store, supervisor) = setup(Duration::from_secs(1)).await;
        let stale = Utc::now() - chrono::Duration::seconds(10);
        registry.upsert_capabilities("d1", DeviceCapabilities::default(), stale);
        store
            .update_device_status("d1", true, stale)
            .await
            .unwrap();

        supervisor.run_timeout_scan().await;

        assert!(!registry.get("d1").unwrap().online);
        let row = store.get_device("d1").await.unwrap().unwrap();
        assert_eq!(row.status, "offline");
    }

    #[tokio::test]
    async fn test_metrics_snapshot_writes_rows() {
        let (_dir, registry, store, supervisor) = setup(Duration::from_secs(60)).await;
        let now = Utc::now();
        registry.record_sensor_reading(
            SensorReading {
                device_id: "d1".into(),
                sensor_type: "t".into(),
                value: 1.0,
                unit: None,
                quality: None,
                timestamp: now,
            },
            now,
        );

        supervisor.run_metrics_snapshot().await;

        let rows = store.get_metrics(Some("d1")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].messages_received, 1);
    }

    #[tokio::test]
    async fn test_cleanup_runs_against_store() {
        let (_dir, _registry, store, supervisor) = setup(Duration::from_secs(60)).await;
        let old = Utc::now() - chrono::Duration::days(60);
        store
            .store_sensor_data(&SensorReading {
                device_id: "d1".into(),
                sensor_type: "t".into(),
                value: 1.0,
                unit: None,
                quality: None,
                timestamp: old,
            })
            .await
            .unwrap();

        supervisor.run_cleanup().await;

        let rows = store
            .get_sensor_data("d1", "t", 60 * 24 * 365, 100)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
