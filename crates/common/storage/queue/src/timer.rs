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

//! Background timer thread backing [`TimerScheduler`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     crossbeam      ┌──────────────┐   deadline    ┌──────────────┐
//! │    Engine    │ ──── channel ────► │  TimerLoop   │ ──────────►  │ Redelivery   │
//! │  (pull)      │                    │  (bg thread) │              │ task         │
//! └──────────────┘                    └──────────────┘              └──────────────┘
//! ```
//!
//! The loop keeps a min-heap of deadlines and blocks on the channel with a
//! timeout equal to the time left until the earliest deadline. A panicking
//! task is caught and logged so one bad redelivery cannot stop the timer for
//! every other queue.

use std::{
    cmp::Ordering as CmpOrdering,
    collections::BinaryHeap,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicU64, Ordering},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use snafu::ResultExt;
use tracing::{debug, error, info, warn};

use crate::{
    Result,
    error::SpawnTimerSnafu,
    scheduler::{ScheduleHandle, ScheduledEntry, ScheduledTask, VisibilityScheduler},
};

/// A task waiting for its deadline.
struct TimerEntry {
    deadline: Instant,
    /// Tie-breaker keeping equal deadlines in scheduling order.
    seq:      u64,
    entry:    ScheduledEntry,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == CmpOrdering::Equal }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> { Some(self.cmp(other)) }
}

impl Ord for TimerEntry {
    // Reversed so that `BinaryHeap` pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Scheduler backed by a dedicated timer thread.
///
/// Dropping the scheduler stops the thread; tasks whose deadline has not
/// been reached are discarded. For the file backend such messages stay in
/// the in-flight log and can be recovered with
/// [`FileQueueService::requeue_expired`](crate::FileQueueService::requeue_expired).
pub struct TimerScheduler {
    /// Sender side of the channel to the timer loop. `None` after drop.
    tx:     Option<Sender<TimerEntry>>,
    /// Scheduling order counter.
    seq:    AtomicU64,
    /// Handle to the timer thread.
    handle: Option<JoinHandle<()>>,
}

impl TimerScheduler {
    /// Spawns the timer thread.
    pub fn new() -> Result<Self> {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("rsqs-visibility-timer".into())
            .spawn(move || TimerLoop::new(rx).run())
            .context(SpawnTimerSnafu)?;

        debug!("Visibility timer started");
        Ok(Self {
            tx:     Some(tx),
            seq:    AtomicU64::new(0),
            handle: Some(handle),
        })
    }
}

impl VisibilityScheduler for TimerScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> ScheduleHandle {
        let (entry, handle) = ScheduledEntry::new(task);
        let deadline = Instant::now()
            .checked_add(delay)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(u64::from(u32::MAX)));
        let entry = TimerEntry {
            deadline,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            entry,
        };

        let sent = self.tx.as_ref().is_some_and(|tx| tx.send(entry).is_ok());
        if !sent {
            warn!(?delay, "Visibility timer is stopped, task dropped");
        }
        handle
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.tx.take();

        if let Some(handle) = self.handle.take() {
            // A task may hold the last reference to whatever owns this
            // scheduler; joining from the timer thread itself would hang.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Visibility timer thread panicked");
            }
        }
    }
}

struct TimerLoop {
    rx:      Receiver<TimerEntry>,
    waiting: BinaryHeap<TimerEntry>,
}

impl TimerLoop {
    fn new(rx: Receiver<TimerEntry>) -> Self {
        Self {
            rx,
            waiting: BinaryHeap::new(),
        }
    }

    fn run(mut self) {
        loop {
            self.fire_due();

            let received = match self.waiting.peek() {
                Some(next) => self
                    .rx
                    .recv_timeout(next.deadline.saturating_duration_since(Instant::now())),
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok(entry) => self.waiting.push(entry),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let dropped = self
            .waiting
            .iter()
            .filter(|e| !e.entry.is_cancelled())
            .count();
        info!(dropped, "Visibility timer stopped");
    }

    fn fire_due(&mut self) {
        let now = Instant::now();
        while self.waiting.peek().is_some_and(|next| next.deadline <= now) {
            let Some(due) = self.waiting.pop() else {
                break;
            };
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(move || due.entry.run())) {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                error!(%reason, "Visibility task panicked");
            }
        }
    }
}
