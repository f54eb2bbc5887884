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

//! Devicelink Core
//!
//! Fundamental data structures and wire types shared by the storage layer
//! and the bridge server: the device model, bus payload shapes, topic
//! pattern matching and the bridge error taxonomy.

pub mod device;
pub mod error;
pub mod payload;
pub mod topic;

pub use device::{
    ActuatorState, Device, DeviceCapabilities, DeviceError, DeviceMetrics, SensorReading, Severity,
};
pub use error::{BridgeError, Result};
pub use payload::{
    CapabilitiesPayload, CommandPayload, DeviceStatusPayload, ErrorDetails, ErrorPayload,
    SensorDataPayload, SensorValue, ValuePayload,
};
pub use topic::{TopicFilter, TopicMatch};
