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

//! Queue entry type and its single-line text encoding.
//!
//! ## Line Format
//!
//! Each record occupies exactly one line of a log file:
//!
//! ```text
//! ┌──────────────────┬───┬────────────────┬───┬──────────────┐
//! │ timestamp millis │ | │ receipt token  │ | │     body     │
//! └──────────────────┴───┴────────────────┴───┴──────────────┘
//! ```
//!
//! - **Pending** records carry the enqueue time and an empty token:
//!   `1700000000000||hello`
//! - **In-flight** records carry the `visible_from` deadline and the token
//!   of the current delivery attempt:
//!   `1700000030000|5c0f…|hello`
//!
//! Decoding splits on the first two separators only, so a body containing
//! `|` survives a round trip. A body containing a line break cannot be
//! represented and is rejected by [`Record::validate_body`]; nothing is
//! escaped.

use snafu::{OptionExt, ensure};

use crate::{
    Result,
    error::{CorruptRecordSnafu, InvalidArgumentSnafu},
};

/// Field separator of the line format.
pub const SEPARATOR: char = '|';

/// A single queue entry.
///
/// A record is either pending (no token) or in flight (token present). The
/// meaning of `timestamp` follows the state: enqueue time while pending,
/// earliest redelivery time (`visible_from`) while in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Unix timestamp in milliseconds.
    pub timestamp:     i64,
    /// Token of the outstanding delivery attempt, `None` while pending.
    pub receipt_token: Option<String>,
    /// Opaque payload, never inspected.
    pub body:          String,
}

impl Record {
    /// A freshly pushed record.
    pub fn pending(timestamp: i64, body: impl Into<String>) -> Self {
        Self {
            timestamp,
            receipt_token: None,
            body: body.into(),
        }
    }

    /// Marks the record as delivered under `receipt_token` until
    /// `visible_from`.
    #[must_use]
    pub fn into_in_flight(self, receipt_token: String, visible_from: i64) -> Self {
        Self {
            timestamp:     visible_from,
            receipt_token: Some(receipt_token),
            body:          self.body,
        }
    }

    /// Drops the delivery metadata, making the record eligible for `pull`
    /// again as of `timestamp`.
    #[must_use]
    pub fn into_pending(self, timestamp: i64) -> Self { Self::pending(timestamp, self.body) }

    #[must_use]
    pub const fn is_in_flight(&self) -> bool { self.receipt_token.is_some() }

    /// Earliest redelivery time, only meaningful while in flight.
    #[must_use]
    pub const fn visible_from(&self) -> Option<i64> {
        if self.is_in_flight() {
            Some(self.timestamp)
        } else {
            None
        }
    }

    /// Returns `true` if this record is the delivery identified by `token`.
    #[must_use]
    pub fn has_token(&self, token: &str) -> bool { self.receipt_token.as_deref() == Some(token) }

    /// Encodes the record as one line, without the trailing newline.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.timestamp,
            self.receipt_token.as_deref().unwrap_or_default(),
            self.body
        )
    }

    /// Decodes a line produced by [`Record::encode`].
    pub fn decode(line: &str) -> Result<Self> {
        let mut fields = line.splitn(3, SEPARATOR);

        let timestamp = fields
            .next()
            .unwrap_or_default()
            .parse::<i64>()
            .ok()
            .context(CorruptRecordSnafu {
                line,
                reason: "timestamp is not an integer",
            })?;
        let token = fields.next().context(CorruptRecordSnafu {
            line,
            reason: "missing receipt token field",
        })?;
        let body = fields.next().context(CorruptRecordSnafu {
            line,
            reason: "missing body field",
        })?;
        ensure!(
            !body.is_empty(),
            CorruptRecordSnafu {
                line,
                reason: "empty body",
            }
        );

        Ok(Self {
            timestamp,
            receipt_token: (!token.is_empty()).then(|| token.to_owned()),
            body: body.to_owned(),
        })
    }

    /// Checks that `body` fits on a single log line.
    pub fn validate_body(body: &str) -> Result<()> {
        ensure!(
            !body.contains(['\n', '\r']),
            InvalidArgumentSnafu {
                reason: "message body must not contain line breaks",
            }
        );
        Ok(())
    }
}

/// Parses a millisecond count stored as a single line of text.
pub(crate) fn parse_millis(text: &str) -> Result<u64> {
    text.trim().parse::<u64>().map_err(|e| {
        CorruptRecordSnafu {
            line:   text.trim(),
            reason: e.to_string(),
        }
        .build()
    })
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_pending_encoding() {
        let record = Record::pending(1_700_000_000_000, "hello");
        assert_eq!(record.encode(), "1700000000000||hello");
        assert!(!record.is_in_flight());
        assert_eq!(record.visible_from(), None);
    }

    #[test]
    fn test_in_flight_encoding() {
        let record = Record::pending(1, "hello").into_in_flight("tok-1".into(), 42);
        assert_eq!(record.encode(), "42|tok-1|hello");
        assert_eq!(record.visible_from(), Some(42));
        assert!(record.has_token("tok-1"));
        assert!(!record.has_token("tok-2"));
    }

    #[test]
    fn test_decode_in_flight_line() {
        let record = Record::decode("42|tok-1|hello").unwrap();
        assert_eq!(record.timestamp, 42);
        assert_eq!(record.receipt_token.as_deref(), Some("tok-1"));
        assert_eq!(record.body, "hello");
    }

    #[test]
    fn test_back_to_pending_drops_token() {
        let record = Record::decode("42|tok-1|hello").unwrap().into_pending(50);
        assert_eq!(record.encode(), "50||hello");
    }

    #[test]
    fn test_separator_inside_body_survives() {
        let record = Record::pending(7, "a|b||c");
        let decoded = Record::decode(&record.encode()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test_case("" ; "empty line")]
    #[test_case("abc||hello" ; "non numeric timestamp")]
    #[test_case("12" ; "missing token field")]
    #[test_case("12|tok" ; "missing body field")]
    #[test_case("12|tok|" ; "empty body")]
    fn test_decode_rejects(line: &str) {
        let err = Record::decode(line).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
    }

    #[test]
    fn test_validate_body() {
        assert!(Record::validate_body("one line | with separator").is_ok());
        let err = Record::validate_body("two\nlines").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(Record::validate_body("carriage\rreturn").is_err());
    }

    #[test]
    fn test_parse_millis() {
        assert_eq!(parse_millis("30000\n").unwrap(), 30_000);
        assert!(parse_millis("soon").is_err());
    }
}
