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

use std::{io, path::PathBuf};

use snafu::{Location, Snafu};

/// Coarse failure category exposed to callers.
///
/// Every [`QueueError`] maps onto exactly one kind. Adapters (CLI, remote
/// wrappers) should branch on the kind rather than on individual variants.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Empty name, body or token, or a non-positive timeout. Never retried.
    InvalidArgument,
    /// `push`/`pull` against a queue that was never created.
    QueueNotFound,
    /// I/O or on-disk format failure. Surfaced as-is, never retried.
    StorageFailure,
}

/// Queue operation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    #[snafu(display("Invalid argument: {reason}"))]
    InvalidArgument {
        reason: String,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Queue '{queue}' doesn't exist"))]
    QueueNotFound {
        queue: String,
        #[snafu(implicit)]
        loc:   Location,
    },

    #[snafu(display("IO error on {}", path.display()))]
    Io {
        path:   PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Corrupted record {line:?}: {reason}"))]
    CorruptRecord {
        line:   String,
        reason: String,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Failed to spawn visibility timer thread"))]
    SpawnTimer {
        source: io::Error,
        #[snafu(implicit)]
        loc:    Location,
    },
}

impl QueueError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::QueueNotFound { .. } => ErrorKind::QueueNotFound,
            Self::Io { .. } | Self::CorruptRecord { .. } | Self::SpawnTimer { .. } => {
                ErrorKind::StorageFailure
            }
        }
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use snafu::ResultExt;

    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = InvalidArgumentSnafu {
            reason: "empty queue name",
        }
        .build();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = QueueNotFoundSnafu { queue: "orders" }.build();
        assert_eq!(err.kind(), ErrorKind::QueueNotFound);
        assert_eq!(err.to_string(), "Queue 'orders' doesn't exist");

        let err = Err::<(), _>(io::Error::other("disk gone"))
            .context(IoSnafu {
                path: PathBuf::from("/tmp/q/messages"),
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert_eq!(err.to_string(), "IO error on /tmp/q/messages");
    }

    #[test]
    fn test_kind_string_form() {
        assert_eq!(ErrorKind::QueueNotFound.to_string(), "queue_not_found");
        let name: &'static str = ErrorKind::StorageFailure.into();
        assert_eq!(name, "storage_failure");
        assert_eq!(
            ErrorKind::from_str("invalid_argument").unwrap(),
            ErrorKind::InvalidArgument
        );
    }
}
