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

//! Directory-based inter-process lock.
//!
//! `mkdir` either creates the marker or fails with `AlreadyExists`, and the
//! filesystem guarantees only one caller succeeds. That single primitive
//! serializes every thread and every process sharing a queue directory.
//!
//! Acquisition spins with a fixed sleep between attempts. There is no
//! fairness and no bound on the wait: a process that dies inside the
//! critical section leaves the marker behind, and everyone else waits until
//! it is removed, either by hand or through the optional staleness timeout.
//!
//! Breaking a stale marker is itself serialized by a second marker
//! (`<lock>.break`). The breaker re-checks the age of the lock marker while
//! holding it, so a marker freshly created by another waiter is never
//! mistaken for the abandoned one. A holder that outlives the staleness
//! timeout can still lose its marker; the timeout must exceed any critical
//! section.

use std::{
    fs, io,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use snafu::ResultExt;
use tracing::{trace, warn};

use crate::{Result, error::IoSnafu};

/// Held lock marker. Dropping the guard removes the marker.
#[derive(Debug)]
pub(crate) struct DirLockGuard {
    path: PathBuf,
}

/// How to wait for a busy lock marker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LockPolicy {
    /// Sleep between two `mkdir` attempts.
    pub retry_interval: Duration,
    /// Age after which an existing marker is treated as abandoned.
    pub stale_after:    Option<Duration>,
}

impl DirLockGuard {
    /// Blocks until the marker at `path` could be created.
    pub(crate) fn acquire(path: &Path, policy: LockPolicy) -> Result<Self> {
        loop {
            match fs::create_dir(path) {
                Ok(()) => {
                    trace!(path = ?path, "Lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if let Some(stale_after) = policy.stale_after
                        && is_older_than(path, stale_after)
                        && break_if_stale(path, stale_after)?
                    {
                        continue;
                    }
                    thread::sleep(policy.retry_interval);
                }
                Err(e) => return Err(e).context(IoSnafu { path }),
            }
        }
    }
}

impl Drop for DirLockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir(&self.path) {
            warn!(path = ?self.path, error = %e, "Failed to release lock marker");
        } else {
            trace!(path = ?self.path, "Lock released");
        }
    }
}

/// Removes a lock marker regardless of who holds it, together with the
/// breaker marker a crashed breaker may have left. Returns `false` if there
/// was neither.
pub(crate) fn break_lock(path: &Path) -> Result<bool> {
    let lock = remove_marker(path)?;
    let breaker = remove_marker(&breaker_path(path))?;
    Ok(lock || breaker)
}

/// Removes the marker at `path` if it is still older than `stale_after`.
/// Returns `false` when another waiter is already breaking it or the marker
/// turned out to be fresh.
fn break_if_stale(path: &Path, stale_after: Duration) -> Result<bool> {
    let breaker = breaker_path(path);
    match fs::create_dir(&breaker) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e).context(IoSnafu { path: &breaker }),
    }
    let _breaker = DirLockGuard { path: breaker };

    if !is_older_than(path, stale_after) {
        return Ok(false);
    }
    warn!(path = ?path, ?stale_after, "Breaking stale lock marker");
    remove_marker(path)
}

fn remove_marker(path: &Path) -> Result<bool> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).context(IoSnafu { path }),
    }
}

fn breaker_path(path: &Path) -> PathBuf {
    let mut breaker = path.as_os_str().to_owned();
    breaker.push(".break");
    PathBuf::from(breaker)
}

fn is_older_than(path: &Path, age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|elapsed| elapsed >= age)
}
