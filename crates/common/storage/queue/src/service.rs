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

//! The queue service contract shared by every backend.
//!
//! Both engines in this crate implement [`QueueService`], and so should any
//! adapter forwarding to a remote managed queue, so that callers stay
//! backend-agnostic.
//!
//! ## Delivery State Machine
//!
//! ```text
//!            push                 pull (new token, timer armed)
//!   ────────────────► Pending ─────────────────────────────► InFlight
//!                        ▲                                      │
//!                        │  timer fires, token still present    │ delete(token)
//!                        └──────────────────────────────────────┤
//!                          (reinserted ahead of the backlog)    ▼
//!                                                            Deleted
//! ```
//!
//! `delete` with a token that no longer matches an in-flight record is a
//! no-op in every state.

use std::time::Duration;

use chrono::Utc;
use snafu::ensure;

use crate::{Message, Result, error::InvalidArgumentSnafu};

/// Visibility timeout used by [`QueueService::create_queue_default`].
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// At-least-once queue operations.
///
/// All operations block the calling thread until the per-queue critical
/// section has been entered and left. Operations on the same queue are
/// linearizable; operations on different queues are independent.
pub trait QueueService: Send + Sync {
    /// Creates `name` or, if it exists, refreshes its visibility timeout
    /// without touching the backlog.
    fn create_queue(&self, name: &str, visibility_timeout: Duration) -> Result<()>;

    /// Creates `name` with the backend's default visibility timeout.
    fn create_queue_default(&self, name: &str) -> Result<()> {
        self.create_queue(name, DEFAULT_VISIBILITY_TIMEOUT)
    }

    /// Appends `body` to the backlog of `queue`.
    fn push(&self, queue: &str, body: &str) -> Result<()>;

    /// Takes the oldest pending message and hides it for the queue's
    /// visibility timeout. Returns `None` when the backlog is empty.
    fn pull(&self, queue: &str) -> Result<Option<Message>>;

    /// Acknowledges the delivery identified by `receipt_token`.
    ///
    /// Unknown queues and stale tokens are silently ignored.
    fn delete(&self, queue: &str, receipt_token: &str) -> Result<()>;
}

pub(crate) fn ensure_queue_name(name: &str) -> Result<()> {
    ensure!(
        !name.is_empty(),
        InvalidArgumentSnafu {
            reason: "queue name must not be empty",
        }
    );
    Ok(())
}

pub(crate) fn ensure_body(body: &str) -> Result<()> {
    ensure!(
        !body.is_empty(),
        InvalidArgumentSnafu {
            reason: "message body must not be empty",
        }
    );
    Ok(())
}

pub(crate) fn ensure_receipt_token(token: &str) -> Result<()> {
    ensure!(
        !token.is_empty(),
        InvalidArgumentSnafu {
            reason: "receipt token must not be empty",
        }
    );
    Ok(())
}

/// Rejects timeouts that round down to zero milliseconds.
pub(crate) fn ensure_visibility_timeout(timeout: Duration) -> Result<()> {
    ensure!(
        timeout.as_millis() > 0,
        InvalidArgumentSnafu {
            reason: format!("visibility timeout must be positive, got {timeout:?}"),
        }
    );
    Ok(())
}

/// Current wall-clock time in Unix milliseconds.
pub(crate) fn now_millis() -> i64 { Utc::now().timestamp_millis() }

/// `visible_from` for a delivery made now.
pub(crate) fn visible_from(timeout: Duration) -> i64 {
    let timeout = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
    now_millis().saturating_add(timeout)
}
