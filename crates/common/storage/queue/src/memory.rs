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

//! In-process queue engine.
//!
//! Every queue lives in one map guarded by a single reader/writer lock.
//! Mutations, including timer-driven redeliveries, take the write lock, so
//! a `delete` racing with an expiring timer is decided by whoever gets the
//! lock first; the loser finds the token gone and does nothing.
//!
//! Nothing is persisted and nothing is shared across processes.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::RwLock;
use snafu::OptionExt;
use tracing::{debug, trace};

use crate::{
    Message, Result,
    error::QueueNotFoundSnafu,
    message::mint_receipt_token,
    record::Record,
    scheduler::{ScheduleHandle, VisibilityScheduler},
    service::{
        DEFAULT_VISIBILITY_TIMEOUT, QueueService, ensure_body, ensure_queue_name,
        ensure_receipt_token, ensure_visibility_timeout, now_millis, visible_from,
    },
};

struct QueueState {
    visibility_timeout: Duration,
    pending:            VecDeque<Record>,
}

struct InFlight {
    queue:  String,
    record: Record,
    /// Armed redelivery, attached right after the pull that created it.
    timer:  Option<ScheduleHandle>,
}

#[derive(Default)]
struct MemoryState {
    queues:    HashMap<String, QueueState>,
    /// Outstanding deliveries keyed by receipt token.
    in_flight: HashMap<String, InFlight>,
}

impl MemoryState {
    /// Moves the delivery `token` back to the front of its queue.
    fn expire(&mut self, token: &str) -> bool {
        let Some(entry) = self.in_flight.remove(token) else {
            return false;
        };
        if let Some(timer) = &entry.timer {
            timer.cancel();
        }
        if let Some(queue) = self.queues.get_mut(&entry.queue) {
            queue
                .pending
                .push_front(entry.record.into_pending(now_millis()));
        }
        debug!(queue = %entry.queue, token, "Message visible again");
        true
    }

    fn queue(&self, name: &str) -> Result<&QueueState> {
        self.queues
            .get(name)
            .context(QueueNotFoundSnafu { queue: name })
    }
}

/// Queue engine keeping all state in memory.
///
/// Cloning yields another handle to the same queues.
#[derive(Clone)]
pub struct MemoryQueueService {
    state:                      Arc<RwLock<MemoryState>>,
    scheduler:                  Arc<dyn VisibilityScheduler>,
    default_visibility_timeout: Duration,
}

impl MemoryQueueService {
    pub fn new(scheduler: Arc<dyn VisibilityScheduler>) -> Self {
        Self {
            state: Arc::default(),
            scheduler,
            default_visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    /// Overrides the timeout used by [`QueueService::create_queue_default`].
    #[must_use]
    pub const fn with_default_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.default_visibility_timeout = timeout;
        self
    }

    /// Runs the visibility-timeout handler for `receipt_token` right away.
    ///
    /// Returns `true` if the delivery was still outstanding and its message
    /// is pending again, `false` if the token was unknown, already deleted,
    /// or belongs to another queue.
    pub fn expire(&self, queue: &str, receipt_token: &str) -> Result<bool> {
        ensure_queue_name(queue)?;
        ensure_receipt_token(receipt_token)?;

        let mut state = self.state.write();
        let owned = state
            .in_flight
            .get(receipt_token)
            .is_some_and(|entry| entry.queue == queue);
        Ok(owned && state.expire(receipt_token))
    }

    /// Number of pending messages in `queue`.
    pub fn queue_depth(&self, queue: &str) -> Result<usize> {
        Ok(self.state.read().queue(queue)?.pending.len())
    }

    /// Number of delivered but not yet deleted messages of `queue`.
    pub fn in_flight_count(&self, queue: &str) -> Result<usize> {
        let state = self.state.read();
        state.queue(queue)?;
        Ok(state
            .in_flight
            .values()
            .filter(|entry| entry.queue == queue)
            .count())
    }

    /// Names of all queues, sorted.
    pub fn list_queues(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.read().queues.keys().cloned().collect();
        names.sort();
        names
    }

    fn arm_timer(&self, timeout: Duration, token: String) -> ScheduleHandle {
        let state: Weak<RwLock<MemoryState>> = Arc::downgrade(&self.state);
        self.scheduler.schedule(
            timeout,
            Box::new(move || {
                if let Some(state) = state.upgrade() {
                    state.write().expire(&token);
                }
            }),
        )
    }
}

impl QueueService for MemoryQueueService {
    fn create_queue(&self, name: &str, visibility_timeout: Duration) -> Result<()> {
        ensure_queue_name(name)?;
        ensure_visibility_timeout(visibility_timeout)?;

        let mut state = self.state.write();
        state
            .queues
            .entry(name.to_owned())
            .and_modify(|queue| queue.visibility_timeout = visibility_timeout)
            .or_insert_with(|| QueueState {
                visibility_timeout,
                pending: VecDeque::new(),
            });
        debug!(queue = name, ?visibility_timeout, "Queue created");
        Ok(())
    }

    fn create_queue_default(&self, name: &str) -> Result<()> {
        self.create_queue(name, self.default_visibility_timeout)
    }

    fn push(&self, queue: &str, body: &str) -> Result<()> {
        ensure_queue_name(queue)?;
        ensure_body(body)?;

        let mut state = self.state.write();
        let target = state
            .queues
            .get_mut(queue)
            .context(QueueNotFoundSnafu { queue })?;
        target.pending.push_back(Record::pending(now_millis(), body));
        trace!(queue, depth = target.pending.len(), "Message pushed");
        Ok(())
    }

    fn pull(&self, queue: &str) -> Result<Option<Message>> {
        ensure_queue_name(queue)?;

        let token = mint_receipt_token();
        let (message, timeout) = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let target = state
                .queues
                .get_mut(queue)
                .context(QueueNotFoundSnafu { queue })?;
            let Some(record) = target.pending.pop_front() else {
                return Ok(None);
            };

            let timeout = target.visibility_timeout;
            let record = record.into_in_flight(token.clone(), visible_from(timeout));
            let message = Message::new(record.body.clone(), token.clone());
            state.in_flight.insert(
                token.clone(),
                InFlight {
                    queue: queue.to_owned(),
                    record,
                    timer: None,
                },
            );
            (message, timeout)
        };

        // Scheduled outside the lock so that a scheduler running the task
        // inline cannot deadlock.
        let handle = self.arm_timer(timeout, token.clone());
        match self.state.write().in_flight.get_mut(&token) {
            Some(entry) => entry.timer = Some(handle),
            None => {
                handle.cancel();
            }
        }

        trace!(queue, token, "Message pulled");
        Ok(Some(message))
    }

    fn delete(&self, queue: &str, receipt_token: &str) -> Result<()> {
        ensure_queue_name(queue)?;
        ensure_receipt_token(receipt_token)?;

        let mut state = self.state.write();
        let owned = state
            .in_flight
            .get(receipt_token)
            .is_some_and(|entry| entry.queue == queue);
        if !owned {
            trace!(queue, receipt_token, "Delete ignored, token not in flight");
            return Ok(());
        }

        if let Some(entry) = state.in_flight.remove(receipt_token)
            && let Some(timer) = entry.timer
        {
            timer.cancel();
        }
        trace!(queue, receipt_token, "Message deleted");
        Ok(())
    }
}
