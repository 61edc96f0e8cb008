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

//! Consumer-visible message type.

use uuid::Uuid;

/// A message delivered by `pull`.
///
/// The receipt token identifies this particular delivery attempt. It is the
/// only way to acknowledge the message with `delete`; once the visibility
/// timeout elapses the message is redelivered under a new token and this one
/// stops matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The payload as pushed.
    pub body:          String,
    /// Handle for acknowledging this delivery.
    pub receipt_token: String,
}

impl Message {
    pub(crate) const fn new(body: String, receipt_token: String) -> Self {
        Self {
            body,
            receipt_token,
        }
    }
}

/// Mints a receipt token that has never been handed out before.
pub(crate) fn mint_receipt_token() -> String { Uuid::new_v4().to_string() }
