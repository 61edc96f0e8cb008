// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::{lock::LockPolicy, service::DEFAULT_VISIBILITY_TIMEOUT};

/// Configuration of the file-backed engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct FileQueueConfig {
    /// Directory holding one sub-directory per queue
    #[default(_code = "PathBuf::from(\"./queue_data\")")]
    pub base_path: PathBuf,

    /// Timeout used by `create_queue_default` and for queues whose persisted
    /// timeout is missing
    #[default(_code = "DEFAULT_VISIBILITY_TIMEOUT")]
    #[serde(with = "humantime_serde")]
    pub default_visibility_timeout: Duration,

    /// Sleep between two attempts to take a busy queue lock
    #[default(_code = "Duration::from_millis(50)")]
    #[serde(with = "humantime_serde")]
    pub lock_retry_interval: Duration,

    /// Age after which a lock marker is considered abandoned and removed.
    /// `None` waits forever.
    #[serde(with = "humantime_serde")]
    pub stale_lock_timeout: Option<Duration>,

    /// Whether rewrites and appends are synced to disk before returning
    #[default = true]
    pub sync_on_write: bool,
}

impl FileQueueConfig {
    pub(crate) const fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            retry_interval: self.lock_retry_interval,
            stale_after:    self.stale_lock_timeout,
        }
    }
}
