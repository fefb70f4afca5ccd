// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Visit store error types

use thiserror::Error;

use crate::key::EntityKey;

/// Result type for visit store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the visit store
///
/// `Clone` because a single backend failure completes every entry of the
/// chunk it was writing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing store refused a conditional insert: the key exists
    #[error("Key already exists: {0}")]
    Conflict(EntityKey),

    /// Freshly minted item ids collided with committed ones
    #[error("Item id collision")]
    IdCollision,

    /// Another writer already committed this sequence number
    #[error("Sequence {seq_id} already committed for target {target}")]
    SequenceConflict { target: String, seq_id: u64 },

    /// Any other backing store error
    #[error("Store failure: {0}")]
    Failure(String),

    /// Stored record without a usable shape
    #[error("Malformed entity {key}: {reason}")]
    MalformedEntity { key: EntityKey, reason: String },

    /// The target already holds a batch at the last sequence number
    #[error("No sequence numbers left for target {target}")]
    SequenceExhausted { target: String },

    /// Conflict retry budget used up
    #[error("Gave up on target {target} after {attempts} conflicting writes")]
    RetriesExhausted { target: String, attempts: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The per-target writer went away before completing the append
    #[error("Write queue closed")]
    QueueClosed,
}

impl StoreError {
    /// Whether this is the backing store's key-exists signal.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
