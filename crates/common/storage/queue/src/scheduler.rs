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

//! Delayed-redelivery scheduling port.
//!
//! Engines never talk to a timer directly. On every `pull` they hand a
//! redelivery task to a [`VisibilityScheduler`] and keep the returned
//! [`ScheduleHandle`] so that a later `delete` can cancel it.
//!
//! Cancellation is an optimization only: a task that runs after its message
//! was deleted finds the receipt token gone and does nothing.
//!
//! Two implementations ship with the crate:
//! - [`TimerScheduler`](crate::TimerScheduler): a background thread firing
//!   tasks at their deadline.
//! - [`ManualScheduler`]: records tasks and runs them only when told to,
//!   on the caller's thread. Meant for tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;

/// Work scheduled to run once after a delay.
pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks after a delay, with best-effort cancellation.
pub trait VisibilityScheduler: Send + Sync {
    /// Arranges for `task` to run once, no earlier than `delay` from now.
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> ScheduleHandle;
}

const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const STARTED: u8 = 2;

/// Shared state of one scheduled task.
///
/// Exactly one of [`cancel`](Self::cancel) and [`try_start`](Self::try_start)
/// wins; the loser observes `false`.
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
    state: Arc<AtomicU8>,
}

impl Default for ScheduleHandle {
    fn default() -> Self { Self::new() }
}

impl ScheduleHandle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    /// Prevents the task from running. Returns `false` if it already
    /// started or was already cancelled.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claims the right to run the task. Called by scheduler
    /// implementations right before invoking it.
    pub fn try_start(&self) -> bool {
        self.state
            .compare_exchange(PENDING, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool { self.state.load(Ordering::Acquire) == PENDING }

    #[must_use]
    pub fn is_cancelled(&self) -> bool { self.state.load(Ordering::Acquire) == CANCELLED }
}

/// A task bundled with its handle.
pub(crate) struct ScheduledEntry {
    handle: ScheduleHandle,
    task:   ScheduledTask,
}

impl ScheduledEntry {
    pub(crate) fn new(task: ScheduledTask) -> (Self, ScheduleHandle) {
        let handle = ScheduleHandle::new();
        (
            Self {
                handle: handle.clone(),
                task,
            },
            handle,
        )
    }

    /// Runs the task unless it was cancelled. Returns whether it ran.
    pub(crate) fn run(self) -> bool {
        if !self.handle.try_start() {
            return false;
        }
        (self.task)();
        true
    }

    pub(crate) fn is_cancelled(&self) -> bool { self.handle.is_cancelled() }
}

#[derive(Default)]
struct ManualState {
    queue:     VecDeque<(Duration, ScheduledEntry)>,
    scheduled: usize,
}

/// Scheduler that only runs tasks when asked to.
///
/// Tasks run synchronously on the thread calling [`fire_next`] or
/// [`fire_all`], in the order they were scheduled, regardless of delay.
/// This is the synchronous stand-in used to drive visibility timeouts
/// deterministically in tests.
///
/// [`fire_next`]: Self::fire_next
/// [`fire_all`]: Self::fire_all
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Total number of `schedule` calls so far.
    #[must_use]
    pub fn scheduled_count(&self) -> usize { self.state.lock().scheduled }

    /// Number of tasks neither run nor cancelled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .queue
            .iter()
            .filter(|(_, entry)| !entry.is_cancelled())
            .count()
    }

    /// Delays of the tasks still waiting, in scheduling order.
    #[must_use]
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.state
            .lock()
            .queue
            .iter()
            .filter(|(_, entry)| !entry.is_cancelled())
            .map(|(delay, _)| *delay)
            .collect()
    }

    /// Runs the oldest task that was not cancelled. Returns `false` if none
    /// was left.
    pub fn fire_next(&self) -> bool {
        loop {
            // The lock must not be held while the task runs: the task takes
            // engine locks and may schedule again.
            let Some((_, entry)) = self.state.lock().queue.pop_front() else {
                return false;
            };
            if entry.run() {
                return true;
            }
        }
    }

    /// Runs every waiting task, including ones scheduled while firing.
    /// Returns how many ran.
    pub fn fire_all(&self) -> usize {
        let mut fired = 0;
        while self.fire_next() {
            fired += 1;
        }
        fired
    }
}

impl VisibilityScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> ScheduleHandle {
        let (entry, handle) = ScheduledEntry::new(task);
        let mut state = self.state.lock();
        state.scheduled += 1;
        state.queue.push_back((delay, entry));
        handle
    }
}
