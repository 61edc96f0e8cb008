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

//! On-disk layout of the file backend.
//!
//! ```text
//! base/
//! └── <queue>/
//!     ├── .lock                    mutual-exclusion marker (directory)
//!     ├── messages                 pending records, oldest first
//!     ├── invisible_messages       in-flight records
//!     ├── visibility_timeout       timeout in milliseconds
//!     ├── copy_messages            transient, only during a rewrite
//!     └── copy_invisible_messages  transient, only during a rewrite
//! ```

use std::path::{Path, PathBuf};

use snafu::{ResultExt, ensure};

use crate::{
    Result,
    error::{InvalidArgumentSnafu, IoSnafu},
};

pub const LOCK: &str = ".lock";
pub const MESSAGES: &str = "messages";
pub const COPY_MESSAGES: &str = "copy_messages";
pub const INVISIBLE_MESSAGES: &str = "invisible_messages";
pub const COPY_INVISIBLE_MESSAGES: &str = "copy_invisible_messages";
pub const VISIBILITY_TIMEOUT: &str = "visibility_timeout";
pub const COPY_VISIBILITY_TIMEOUT: &str = "copy_visibility_timeout";

/// Paths of the files making up one queue.
#[derive(Debug, Clone)]
pub struct QueuePaths {
    dir: PathBuf,
}

impl QueuePaths {
    pub fn new<P: AsRef<Path>>(base: P, queue: &str) -> Self {
        Self {
            dir: base.as_ref().join(queue),
        }
    }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn lock(&self) -> PathBuf { self.dir.join(LOCK) }

    pub fn messages(&self) -> PathBuf { self.dir.join(MESSAGES) }

    pub fn copy_messages(&self) -> PathBuf { self.dir.join(COPY_MESSAGES) }

    pub fn invisible_messages(&self) -> PathBuf { self.dir.join(INVISIBLE_MESSAGES) }

    pub fn copy_invisible_messages(&self) -> PathBuf { self.dir.join(COPY_INVISIBLE_MESSAGES) }

    pub fn visibility_timeout(&self) -> PathBuf { self.dir.join(VISIBILITY_TIMEOUT) }

    pub fn copy_visibility_timeout(&self) -> PathBuf { self.dir.join(COPY_VISIBILITY_TIMEOUT) }

    /// A queue exists once its pending log exists.
    pub fn exists(&self) -> bool { self.messages().is_file() }
}

/// Checks that `name` maps to exactly one directory below the base path.
pub fn ensure_dir_name(name: &str) -> Result<()> {
    let single_component = !name.contains(['/', '\\', '\0']) && !name.starts_with('.');
    ensure!(
        single_component,
        InvalidArgumentSnafu {
            reason: format!("queue name {name:?} is not a valid directory name"),
        }
    );
    Ok(())
}

/// Lists the queues stored under `base`, sorted by name.
pub fn scan_queues<P: AsRef<Path>>(base: P) -> Result<Vec<String>> {
    let base = base.as_ref();
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut queues = Vec::new();
    for entry in std::fs::read_dir(base).context(IoSnafu { path: base })? {
        let entry = entry.context(IoSnafu { path: base })?;
        let path = entry.path();

        if path.join(MESSAGES).is_file()
            && let Some(name) = path.file_name().and_then(|s| s.to_str())
        {
            queues.push(name.to_owned());
        }
    }

    queues.sort();
    Ok(queues)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_queue_paths() {
        let paths = QueuePaths::new("/base", "orders");
        assert_eq!(paths.dir(), Path::new("/base/orders"));
        assert_eq!(paths.lock(), PathBuf::from("/base/orders/.lock"));
        assert_eq!(paths.messages(), PathBuf::from("/base/orders/messages"));
        assert_eq!(
            paths.invisible_messages(),
            PathBuf::from("/base/orders/invisible_messages")
        );
        assert_eq!(
            paths.copy_messages(),
            PathBuf::from("/base/orders/copy_messages")
        );
        assert_eq!(
            paths.copy_invisible_messages(),
            PathBuf::from("/base/orders/copy_invisible_messages")
        );
    }

    #[test_case("orders" ; "plain")]
    #[test_case("orders-v2.fifo" ; "dots and dashes")]
    fn test_valid_dir_names(name: &str) {
        assert!(ensure_dir_name(name).is_ok());
    }

    #[test_case("a/b" ; "slash")]
    #[test_case("a\\b" ; "backslash")]
    #[test_case(".." ; "parent")]
    #[test_case(".hidden" ; "leading dot")]
    fn test_invalid_dir_names(name: &str) {
        assert!(ensure_dir_name(name).is_err());
    }

    #[test]
    fn test_scan_queues() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let base = temp_dir.path();

        for queue in ["beta", "alpha"] {
            let paths = QueuePaths::new(base, queue);
            std::fs::create_dir_all(paths.dir()).unwrap();
            std::fs::File::create(paths.messages()).unwrap();
        }
        // Directories without a pending log are not queues.
        std::fs::create_dir_all(base.join("stray")).unwrap();

        assert_eq!(scan_queues(base).unwrap(), vec!["alpha", "beta"]);
        assert!(scan_queues(base.join("missing")).unwrap().is_empty());
    }
}
