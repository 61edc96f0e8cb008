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

use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::{
    FileQueueConfig, FileQueueService, MemoryQueueService, Result, TimerScheduler,
    VisibilityScheduler,
};

/// Assembles either engine.
///
/// Without an explicit [`scheduler`](Self::scheduler), each build spawns its
/// own [`TimerScheduler`].
#[derive(Default)]
pub struct QueueBuilder {
    config:    FileQueueConfig,
    scheduler: Option<Arc<dyn VisibilityScheduler>>,
}

impl QueueBuilder {
    /// Starts a file engine rooted at `base_path`.
    pub fn new<P: Into<PathBuf>>(base_path: P) -> Self {
        Self::from_config(FileQueueConfig {
            base_path: base_path.into(),
            ..Default::default()
        })
    }

    /// Starts an in-memory engine. Only the visibility settings apply.
    #[must_use]
    pub fn in_memory() -> Self { Self::default() }

    #[must_use]
    pub fn from_config(config: FileQueueConfig) -> Self {
        Self {
            config,
            scheduler: None,
        }
    }

    #[must_use]
    pub const fn default_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_visibility_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn lock_retry_interval(mut self, interval: Duration) -> Self {
        self.config.lock_retry_interval = interval;
        self
    }

    #[must_use]
    pub const fn stale_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.stale_lock_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn sync_on_write(mut self, sync: bool) -> Self {
        self.config.sync_on_write = sync;
        self
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn VisibilityScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build_file(self) -> Result<FileQueueService> {
        let scheduler = Self::scheduler_or_timer(self.scheduler)?;
        FileQueueService::open(self.config, scheduler)
    }

    pub fn build_memory(self) -> Result<MemoryQueueService> {
        let scheduler = Self::scheduler_or_timer(self.scheduler)?;
        Ok(MemoryQueueService::new(scheduler)
            .with_default_visibility_timeout(self.config.default_visibility_timeout))
    }

    fn scheduler_or_timer(
        scheduler: Option<Arc<dyn VisibilityScheduler>>,
    ) -> Result<Arc<dyn VisibilityScheduler>> {
        match scheduler {
            Some(scheduler) => Ok(scheduler),
            None => Ok(Arc::new(TimerScheduler::new()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{ManualScheduler, QueueService};

    #[test]
    fn test_builder_default_config() {
        let builder = QueueBuilder::new("/tmp/test_queue");
        assert_eq!(builder.config.base_path, PathBuf::from("/tmp/test_queue"));
        assert_eq!(
            builder.config.default_visibility_timeout,
            Duration::from_secs(30)
        );
        assert!(builder.config.sync_on_write);
        assert!(builder.scheduler.is_none());
    }

    #[test]
    fn test_builder_custom_config() {
        let builder = QueueBuilder::new("/tmp/test_queue")
            .default_visibility_timeout(Duration::from_secs(5))
            .lock_retry_interval(Duration::from_millis(2))
            .stale_lock_timeout(Some(Duration::from_secs(60)))
            .sync_on_write(false);

        assert_eq!(
            builder.config.default_visibility_timeout,
            Duration::from_secs(5)
        );
        assert_eq!(builder.config.lock_retry_interval, Duration::from_millis(2));
        assert_eq!(
            builder.config.stale_lock_timeout,
            Some(Duration::from_secs(60))
        );
        assert!(!builder.config.sync_on_write);
    }

    #[test]
    fn test_build_file_with_scheduler() {
        let temp_dir = TempDir::new().unwrap();
        let scheduler = Arc::new(ManualScheduler::new());
        let service = QueueBuilder::new(temp_dir.path().join("nested"))
            .scheduler(scheduler.clone())
            .build_file()
            .unwrap();

        assert!(service.base_path().is_dir());
        service.create_queue_default("q").unwrap();
        service.push("q", "a").unwrap();
        service.pull("q").unwrap().unwrap();
        assert_eq!(scheduler.scheduled_count(), 1);
    }

    #[test]
    fn test_build_memory_with_default_timer() {
        let service = QueueBuilder::in_memory()
            .default_visibility_timeout(Duration::from_secs(1))
            .build_memory()
            .unwrap();
        service.create_queue_default("q").unwrap();
        service.push("q", "a").unwrap();
        assert_eq!(service.pull("q").unwrap().unwrap().body, "a");
    }
}
