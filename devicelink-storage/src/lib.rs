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

//! Devicelink Storage Layer
//!
//! A single-file SQLite database (WAL journaling) holding the durable side
//! of the bridge: the device catalog, sensor time-series, the error log,
//! capability snapshots and per-device metrics.
//!
//! All timestamps are stored as integer unix milliseconds, UTC. Transient
//! busy/locked errors are retried internally with bounded backoff before
//! surfacing as `storage-unavailable`.

pub mod error;
pub mod rows;
pub mod store;

pub use error::StoreError;
pub use rows::{
    CapabilitiesRow, CleanupReport, DeviceErrorRow, DeviceMetricsRow, DeviceRow, SensorDataRow,
    StoreStats,
};
pub use store::{DeviceRegistration, ErrorQuery, Store};
