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

use devicelink_core::BridgeError;
use thiserror::Error;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

impl From<StoreError> for BridgeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidArgument(msg) => BridgeError::InvalidArgument(msg),
            StoreError::Unavailable(e) => BridgeError::StorageUnavailable(e.to_string()),
        }
    }
}

/// Whether an sqlx error is a transient SQLite busy/locked condition worth
/// retrying.
pub(crate) fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let msg = db.message().to_ascii_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}
