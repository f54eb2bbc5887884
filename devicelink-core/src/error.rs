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

//! Bridge error taxonomy.
//!
//! One enum covers every failure class the bridge surfaces across component
//! boundaries. Tools map these onto structured MCP errors via [`BridgeError::code`];
//! internal layers (storage, bus) convert into it at the seam.

use thiserror::Error;

/// Errors surfaced by bridge components.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("sensor {sensor} not found on device {device}")]
    SensorNotFound { device: String, sensor: String },

    #[error("device {0} is offline")]
    DeviceOffline(String),

    #[error("actuator {actuator} not advertised by device {device}")]
    UnknownActuator { device: String, actuator: String },

    #[error("unsupported action {action} for actuator {actuator}")]
    UnsupportedAction { actuator: String, action: String },

    #[error("bus not ready")]
    BusNotReady,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BridgeError {
    /// Stable machine-readable error code, exposed to MCP callers.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::DeviceNotFound(_) => "device-not-found",
            BridgeError::SensorNotFound { .. } => "sensor-not-found",
            BridgeError::DeviceOffline(_) => "device-offline",
            BridgeError::UnknownActuator { .. } => "unknown-actuator",
            BridgeError::UnsupportedAction { .. } => "unsupported-action",
            BridgeError::BusNotReady => "bus-not-ready",
            BridgeError::StorageUnavailable(_) => "storage-unavailable",
            BridgeError::InvalidPayload(_) => "invalid-payload",
            BridgeError::InvalidArgument(_) => "invalid-argument",
            BridgeError::DeadlineExceeded => "deadline-exceeded",
            BridgeError::Config(_) => "fatal-config",
        }
    }

    /// Whether retrying the same call later can succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::BusNotReady
                | BridgeError::StorageUnavailable(_)
                | BridgeError::DeadlineExceeded
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            BridgeError::DeviceNotFound("esp32_aa11bb".into()).code(),
            "device-not-found"
        );
        assert_eq!(BridgeError::BusNotReady.code(), "bus-not-ready");
        assert_eq!(BridgeError::DeadlineExceeded.code(), "deadline-exceeded");
    }

    #[test]
    fn test_transient_classification() {
        assert!(BridgeError::BusNotReady.is_transient());
        assert!(BridgeError::StorageUnavailable("locked".into()).is_transient());
        assert!(!BridgeError::DeviceNotFound("x".into()).is_transient());
    }
}
