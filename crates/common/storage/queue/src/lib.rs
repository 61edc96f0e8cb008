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

//! At-least-once message queue with visibility timeouts.
//!
//! A pulled message is hidden for the queue's visibility timeout and handed
//! out with a fresh receipt token. Deleting with that token acknowledges it;
//! otherwise the message becomes pullable again once the timeout elapses.
//!
//! Two engines implement [`QueueService`]:
//! - [`MemoryQueueService`]: process-local, nothing persisted.
//! - [`FileQueueService`]: line logs under a directory, safe to share
//!   between processes.

pub mod builder;
pub mod config;
pub mod error;
pub mod file;
mod lock;
mod log;
pub mod memory;
pub mod message;
pub mod path;
pub mod record;
pub mod scheduler;
pub mod service;
pub mod timer;

pub use builder::QueueBuilder;
pub use config::FileQueueConfig;
pub use error::{ErrorKind, QueueError, Result};
pub use file::FileQueueService;
pub use memory::MemoryQueueService;
pub use message::Message;
pub use record::Record;
pub use scheduler::{ManualScheduler, ScheduleHandle, ScheduledTask, VisibilityScheduler};
pub use service::{DEFAULT_VISIBILITY_TIMEOUT, QueueService};
pub use timer::TimerScheduler;
