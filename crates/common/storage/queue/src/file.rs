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

//! File-backed queue engine.
//!
//! Each queue is a directory holding two line logs (see [`crate::path`]).
//! Every operation, timer-driven redeliveries included, runs inside the
//! queue's [`DirLockGuard`], which serializes threads and processes alike.
//!
//! ## Crash Ordering
//!
//! A pull touches two logs and only each individual rename is atomic, so the
//! order of the two steps decides what a crash in between costs:
//!
//! ```text
//! pull:      append in-flight record ──► rewrite pending log without head
//! redeliver: rewrite pending log with record in front ──► rewrite in-flight log
//! ```
//!
//! In both cases the record is written to its new home before it is removed
//! from the old one. A crash between the steps leaves it in both logs and it
//! may be delivered twice; it is never lost.

use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use snafu::{ResultExt, ensure};
use tracing::{debug, error, info, trace};

use crate::{
    Message, Result,
    config::FileQueueConfig,
    error::{IoSnafu, QueueNotFoundSnafu},
    lock::{self, DirLockGuard},
    log::{LogRewrite, append_record, count_lines, read_lines, read_records, touch},
    message::mint_receipt_token,
    path::{QueuePaths, ensure_dir_name, scan_queues},
    record::{Record, parse_millis},
    scheduler::{ScheduleHandle, VisibilityScheduler},
    service::{
        QueueService, ensure_body, ensure_queue_name, ensure_receipt_token,
        ensure_visibility_timeout, now_millis, visible_from,
    },
};

struct FileInner {
    config: FileQueueConfig,
    /// Armed redeliveries of the deliveries made by this instance.
    timers: Mutex<HashMap<String, ScheduleHandle>>,
}

impl FileInner {
    fn paths(&self, queue: &str) -> Result<QueuePaths> {
        ensure_queue_name(queue)?;
        ensure_dir_name(queue)?;
        Ok(QueuePaths::new(&self.config.base_path, queue))
    }

    fn existing(&self, queue: &str) -> Result<QueuePaths> {
        let paths = self.paths(queue)?;
        ensure!(paths.exists(), QueueNotFoundSnafu { queue });
        Ok(paths)
    }

    fn lock(&self, paths: &QueuePaths) -> Result<DirLockGuard> {
        DirLockGuard::acquire(&paths.lock(), self.config.lock_policy())
    }

    fn visibility_timeout(&self, paths: &QueuePaths) -> Result<Duration> {
        let path = paths.visibility_timeout();
        match fs::read_to_string(&path) {
            Ok(text) => parse_millis(&text).map(Duration::from_millis),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(self.config.default_visibility_timeout)
            }
            Err(e) => Err(e).context(IoSnafu { path }),
        }
    }

    fn forget_timers<'a>(&self, tokens: impl IntoIterator<Item = &'a str>) {
        let mut timers = self.timers.lock();
        for token in tokens {
            if let Some(timer) = timers.remove(token) {
                timer.cancel();
            }
        }
    }

    /// Moves the in-flight records matching `expired` back to the front of
    /// the pending log, oldest delivery first. Must run under the lock.
    fn requeue_where<F>(&self, paths: &QueuePaths, expired: F) -> Result<Vec<String>>
    where
        F: Fn(&Record) -> bool,
    {
        let invisible = paths.invisible_messages();
        if !invisible.is_file() {
            return Ok(Vec::new());
        }

        let sync = self.config.sync_on_write;
        let mut in_flight =
            LogRewrite::begin(invisible.clone(), paths.copy_invisible_messages(), sync)?;
        let mut requeued = Vec::new();
        for record in read_records(&invisible)? {
            let record = record?;
            if expired(&record) {
                requeued.push(record);
            } else {
                in_flight.write_record(&record)?;
            }
        }
        if requeued.is_empty() {
            return Ok(Vec::new());
        }

        let now = now_millis();
        let messages = paths.messages();
        let mut pending = LogRewrite::begin(messages.clone(), paths.copy_messages(), sync)?;
        let mut tokens = Vec::with_capacity(requeued.len());
        for record in requeued {
            tokens.extend(record.receipt_token.clone());
            pending.write_record(&record.into_pending(now))?;
        }
        pending.write_all(read_lines(&messages)?)?;
        pending.commit()?;
        in_flight.commit()?;

        Ok(tokens)
    }

    fn expire(&self, queue: &str, receipt_token: &str) -> Result<bool> {
        ensure_receipt_token(receipt_token)?;
        let paths = self.paths(queue)?;
        if !paths.exists() {
            return Ok(false);
        }

        let requeued = {
            let _guard = self.lock(&paths)?;
            self.requeue_where(&paths, |record| record.has_token(receipt_token))?
        };
        self.forget_timers(requeued.iter().map(String::as_str));

        if requeued.is_empty() {
            trace!(queue, receipt_token, "Expiry ignored, token not in flight");
            return Ok(false);
        }
        debug!(queue, receipt_token, "Message visible again");
        Ok(true)
    }
}

/// Queue engine persisting every queue under a base directory.
///
/// Several instances, in one process or many, may share the same base
/// directory. Each instance only arms timers for its own deliveries; a
/// delivery whose timer was lost with its process is recovered with
/// [`requeue_expired`](Self::requeue_expired).
#[derive(Clone)]
pub struct FileQueueService {
    inner:     Arc<FileInner>,
    scheduler: Arc<dyn VisibilityScheduler>,
}

impl FileQueueService {
    /// Opens the engine, creating the base directory if needed.
    pub fn open(config: FileQueueConfig, scheduler: Arc<dyn VisibilityScheduler>) -> Result<Self> {
        fs::create_dir_all(&config.base_path).context(IoSnafu {
            path: &config.base_path,
        })?;
        info!(path = ?config.base_path, "File queue opened");

        Ok(Self {
            inner: Arc::new(FileInner {
                config,
                timers: Mutex::new(HashMap::new()),
            }),
            scheduler,
        })
    }

    /// Directory holding the queues.
    pub fn base_path(&self) -> &Path { &self.inner.config.base_path }

    pub fn config(&self) -> &FileQueueConfig { &self.inner.config }

    /// Runs the visibility-timeout handler for `receipt_token` right away.
    ///
    /// Returns `true` if the delivery was still in the in-flight log and its
    /// message is pending again.
    pub fn expire(&self, queue: &str, receipt_token: &str) -> Result<bool> {
        self.inner.expire(queue, receipt_token)
    }

    /// Moves every in-flight record of `queue` whose visibility timeout has
    /// elapsed back to the pending log. Returns how many were moved.
    ///
    /// Timers do not survive the process that armed them; this is how their
    /// deliveries are recovered.
    pub fn requeue_expired(&self, queue: &str) -> Result<usize> {
        let paths = self.inner.existing(queue)?;
        let requeued = {
            let _guard = self.inner.lock(&paths)?;
            let now = now_millis();
            self.inner.requeue_where(&paths, |record| {
                record.visible_from().is_some_and(|deadline| deadline <= now)
            })?
        };
        self.inner.forget_timers(requeued.iter().map(String::as_str));

        if !requeued.is_empty() {
            info!(queue, count = requeued.len(), "Requeued expired messages");
        }
        Ok(requeued.len())
    }

    /// Removes the lock marker of `queue` whoever holds it. Returns `false`
    /// if the queue was not locked.
    ///
    /// Only safe when the holder is known to be gone.
    pub fn break_lock(&self, queue: &str) -> Result<bool> {
        let paths = self.inner.paths(queue)?;
        let broken = lock::break_lock(&paths.lock())?;
        if broken {
            info!(queue, "Lock marker removed");
        }
        Ok(broken)
    }

    /// Number of pending messages in `queue`.
    pub fn queue_depth(&self, queue: &str) -> Result<usize> {
        let paths = self.inner.existing(queue)?;
        let _guard = self.inner.lock(&paths)?;
        count_lines(&paths.messages())
    }

    /// Number of delivered but not yet deleted messages of `queue`.
    pub fn in_flight_count(&self, queue: &str) -> Result<usize> {
        let paths = self.inner.existing(queue)?;
        let _guard = self.inner.lock(&paths)?;
        let invisible = paths.invisible_messages();
        if !invisible.is_file() {
            return Ok(0);
        }
        count_lines(&invisible)
    }

    /// Names of the queues under the base directory, sorted.
    pub fn list_queues(&self) -> Result<Vec<String>> { scan_queues(self.base_path()) }

    fn arm_timer(&self, queue: &str, token: &str, timeout: Duration) {
        let inner: Weak<FileInner> = Arc::downgrade(&self.inner);
        let task_queue = queue.to_owned();
        let task_token = token.to_owned();
        let handle = self.scheduler.schedule(
            timeout,
            Box::new(move || {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                if let Err(e) = inner.expire(&task_queue, &task_token) {
                    error!(queue = %task_queue, error = ?e, "Failed to redeliver message");
                }
                // Another instance may have deleted or requeued the token.
                inner.timers.lock().remove(&task_token);
            }),
        );

        // A task that already started removes its own entry, possibly
        // before this insert; skip it then so no entry is left behind.
        let mut timers = self.inner.timers.lock();
        if handle.is_pending() {
            timers.insert(token.to_owned(), handle);
        }
    }
}

impl QueueService for FileQueueService {
    fn create_queue(&self, name: &str, visibility_timeout: Duration) -> Result<()> {
        ensure_visibility_timeout(visibility_timeout)?;
        let paths = self.inner.paths(name)?;
        fs::create_dir_all(paths.dir()).context(IoSnafu { path: paths.dir() })?;

        let _guard = self.inner.lock(&paths)?;
        let mut timeout = LogRewrite::begin(
            paths.visibility_timeout(),
            paths.copy_visibility_timeout(),
            self.inner.config.sync_on_write,
        )?;
        timeout.write_line(&visibility_timeout.as_millis().to_string())?;
        timeout.commit()?;
        // The pending log goes last: its presence is what makes the queue exist.
        touch(&paths.invisible_messages())?;
        touch(&paths.messages())?;

        debug!(queue = name, ?visibility_timeout, "Queue created");
        Ok(())
    }

    fn create_queue_default(&self, name: &str) -> Result<()> {
        self.create_queue(name, self.inner.config.default_visibility_timeout)
    }

    fn push(&self, queue: &str, body: &str) -> Result<()> {
        ensure_body(body)?;
        Record::validate_body(body)?;
        let paths = self.inner.existing(queue)?;

        let _guard = self.inner.lock(&paths)?;
        append_record(
            &paths.messages(),
            &Record::pending(now_millis(), body),
            self.inner.config.sync_on_write,
        )?;
        trace!(queue, "Message pushed");
        Ok(())
    }

    fn pull(&self, queue: &str) -> Result<Option<Message>> {
        let paths = self.inner.existing(queue)?;
        let sync = self.inner.config.sync_on_write;
        let token = mint_receipt_token();

        let (message, timeout) = {
            let _guard = self.inner.lock(&paths)?;
            let timeout = self.inner.visibility_timeout(&paths)?;

            let messages = paths.messages();
            let mut lines = read_lines(&messages)?;
            let Some(head) = lines.next().transpose()? else {
                return Ok(None);
            };
            let record =
                Record::decode(&head)?.into_in_flight(token.clone(), visible_from(timeout));

            append_record(&paths.invisible_messages(), &record, sync)?;
            let mut pending = LogRewrite::begin(messages, paths.copy_messages(), sync)?;
            pending.write_all(lines)?;
            pending.commit()?;

            (Message::new(record.body, token.clone()), timeout)
        };

        self.arm_timer(queue, &token, timeout);
        trace!(queue, token, "Message pulled");
        Ok(Some(message))
    }

    fn delete(&self, queue: &str, receipt_token: &str) -> Result<()> {
        ensure_receipt_token(receipt_token)?;
        let paths = self.inner.paths(queue)?;
        let invisible = paths.invisible_messages();
        if !paths.exists() || !invisible.is_file() {
            return Ok(());
        }

        let found = {
            let _guard = self.inner.lock(&paths)?;
            let mut rewrite = LogRewrite::begin(
                invisible.clone(),
                paths.copy_invisible_messages(),
                self.inner.config.sync_on_write,
            )?;
            let mut found = false;
            for line in read_lines(&invisible)? {
                let line = line?;
                if !found && Record::decode(&line)?.has_token(receipt_token) {
                    found = true;
                } else {
                    rewrite.write_line(&line)?;
                }
            }
            if found {
                rewrite.commit()?;
            }
            found
        };

        if found {
            self.inner.forget_timers([receipt_token]);
            trace!(queue, receipt_token, "Message deleted");
        } else {
            trace!(queue, receipt_token, "Delete ignored, token not in flight");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;
    use crate::{ErrorKind, ManualScheduler};

    fn service(temp_dir: &TempDir) -> (FileQueueService, Arc<ManualScheduler>) {
        let scheduler = Arc::new(ManualScheduler::new());
        let config = FileQueueConfig {
            base_path: temp_dir.path().to_path_buf(),
            lock_retry_interval: Duration::from_millis(1),
            sync_on_write: false,
            ..Default::default()
        };
        (
            FileQueueService::open(config, scheduler.clone()).unwrap(),
            scheduler,
        )
    }

    fn log_lines(path: &Path) -> Vec<String> {
        read_lines(path).unwrap().map(Result::unwrap).collect()
    }

    #[test]
    fn test_create_queue_layout() {
        let temp_dir = TempDir::new().unwrap();
        let (service, _) = service(&temp_dir);
        service.create_queue("q", Duration::from_secs(5)).unwrap();

        let paths = QueuePaths::new(temp_dir.path(), "q");
        assert!(paths.messages().is_file());
        assert!(paths.invisible_messages().is_file());
        assert!(!paths.lock().exists());
        assert_eq!(
            fs::read_to_string(paths.visibility_timeout()).unwrap().trim(),
            "5000"
        );
    }

    #[test]
    fn test_pull_moves_head_to_in_flight_log() {
        let temp_dir = TempDir::new().unwrap();
        let (service, scheduler) = service(&temp_dir);
        service.create_queue("q", Duration::from_secs(5)).unwrap();
        service.push("q", "a").unwrap();
        service.push("q", "b|with|pipes").unwrap();

        let message = service.pull("q").unwrap().unwrap();
        assert_eq!(message.body, "a");
        assert_eq!(scheduler.pending_delays(), vec![Duration::from_secs(5)]);

        let paths = QueuePaths::new(temp_dir.path(), "q");
        let pending = log_lines(&paths.messages());
        assert_eq!(pending.len(), 1);
        assert!(pending[0].ends_with("||b|with|pipes"));

        let in_flight = log_lines(&paths.invisible_messages());
        assert_eq!(in_flight.len(), 1);
        let record = Record::decode(&in_flight[0]).unwrap();
        assert!(record.has_token(&message.receipt_token));
        assert!(!paths.copy_messages().exists());

        assert_eq!(service.pull("q").unwrap().unwrap().body, "b|with|pipes");
    }

    #[test]
    fn test_fired_timer_releases_entry_after_remote_delete() {
        let temp_dir = TempDir::new().unwrap();
        let (consumer, scheduler) = service(&temp_dir);
        let (producer, _) = service(&temp_dir);
        consumer.create_queue_default("q").unwrap();

        for i in 0..10 {
            producer.push("q", &format!("m{i}")).unwrap();
            let message = consumer.pull("q").unwrap().unwrap();
            producer.delete("q", &message.receipt_token).unwrap();
        }
        assert_eq!(consumer.inner.timers.lock().len(), 10);

        assert_eq!(scheduler.fire_all(), 10);
        assert!(consumer.inner.timers.lock().is_empty());
        assert_eq!(consumer.queue_depth("q").unwrap(), 0);
        assert_eq!(consumer.in_flight_count("q").unwrap(), 0);
    }

    #[test]
    fn test_expiry_reinserts_at_front() {
        let temp_dir = TempDir::new().unwrap();
        let (service, scheduler) = service(&temp_dir);
        service.create_queue_default("q").unwrap();
        service.push("q", "first").unwrap();
        service.push("q", "second").unwrap();

        let first = service.pull("q").unwrap().unwrap();
        assert_eq!(scheduler.fire_all(), 1);
        assert_eq!(service.in_flight_count("q").unwrap(), 0);
        assert_eq!(service.queue_depth("q").unwrap(), 2);

        let again = service.pull("q").unwrap().unwrap();
        assert_eq!(again.body, "first");
        assert_ne!(again.receipt_token, first.receipt_token);
    }

    #[test]
    fn test_delete_removes_record_and_timer() {
        let temp_dir = TempDir::new().unwrap();
        let (service, scheduler) = service(&temp_dir);
        service.create_queue_default("q").unwrap();
        service.push("q", "a").unwrap();

        let message = service.pull("q").unwrap().unwrap();
        service.delete("q", &message.receipt_token).unwrap();

        assert_eq!(scheduler.pending(), 0);
        assert_eq!(service.in_flight_count("q").unwrap(), 0);
        assert!(service.inner.timers.lock().is_empty());
        // Stale and unknown tokens are no-ops.
        service.delete("q", &message.receipt_token).unwrap();
        service.delete("missing", "token").unwrap();
    }

    #[test]
    fn test_failed_delete_leaves_log_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let (service, _) = service(&temp_dir);
        service.create_queue_default("q").unwrap();
        service.push("q", "a").unwrap();
        service.pull("q").unwrap().unwrap();

        let paths = QueuePaths::new(temp_dir.path(), "q");
        let before = log_lines(&paths.invisible_messages());
        service.delete("q", "not-a-token").unwrap();

        assert_eq!(log_lines(&paths.invisible_messages()), before);
        assert!(!paths.copy_invisible_messages().exists());
    }

    #[test]
    fn test_requeue_expired_only_moves_due_records() {
        let temp_dir = TempDir::new().unwrap();
        let (service, _) = service(&temp_dir);
        service.create_queue("q", Duration::from_millis(1)).unwrap();
        service.push("q", "due").unwrap();
        service.pull("q").unwrap().unwrap();

        service.create_queue("q", Duration::from_secs(600)).unwrap();
        service.push("q", "not due").unwrap();
        service.pull("q").unwrap().unwrap();

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(service.requeue_expired("q").unwrap(), 1);
        assert_eq!(service.in_flight_count("q").unwrap(), 1);
        assert_eq!(service.pull("q").unwrap().unwrap().body, "due");
    }

    #[test]
    fn test_missing_timeout_file_uses_default() {
        let temp_dir = TempDir::new().unwrap();
        let (service, scheduler) = service(&temp_dir);
        service.create_queue("q", Duration::from_secs(5)).unwrap();
        fs::remove_file(QueuePaths::new(temp_dir.path(), "q").visibility_timeout()).unwrap();

        service.push("q", "a").unwrap();
        service.pull("q").unwrap().unwrap();
        assert_eq!(
            scheduler.pending_delays(),
            vec![service.config().default_visibility_timeout]
        );
    }

    #[test]
    fn test_corrupt_log_is_storage_failure() {
        let temp_dir = TempDir::new().unwrap();
        let (service, _) = service(&temp_dir);
        service.create_queue_default("q").unwrap();
        fs::write(
            QueuePaths::new(temp_dir.path(), "q").messages(),
            "not-a-record\n",
        )
        .unwrap();

        let err = service.pull("q").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        // The lock is released on the error path.
        assert!(!QueuePaths::new(temp_dir.path(), "q").lock().exists());
    }

    #[test]
    fn test_break_lock() {
        let temp_dir = TempDir::new().unwrap();
        let (service, _) = service(&temp_dir);
        service.create_queue_default("q").unwrap();
        fs::create_dir(QueuePaths::new(temp_dir.path(), "q").lock()).unwrap();

        assert!(service.break_lock("q").unwrap());
        assert!(!service.break_lock("q").unwrap());
        service.push("q", "a").unwrap();
    }

    #[test_case("a/b" ; "nested path")]
    #[test_case(".." ; "parent directory")]
    #[test_case("" ; "empty")]
    fn test_rejects_bad_queue_names(name: &str) {
        let temp_dir = TempDir::new().unwrap();
        let (service, _) = service(&temp_dir);
        let err = service.create_queue_default(name).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_rejects_multiline_body() {
        let temp_dir = TempDir::new().unwrap();
        let (service, _) = service(&temp_dir);
        service.create_queue_default("q").unwrap();
        let err = service.push("q", "two\nlines").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_list_queues() {
        let temp_dir = TempDir::new().unwrap();
        let (service, _) = service(&temp_dir);
        service.create_queue_default("orders").unwrap();
        service.create_queue_default("audit").unwrap();
        assert_eq!(service.list_queues().unwrap(), vec!["audit", "orders"]);
        assert_eq!(service.base_path(), temp_dir.path());
    }
}
