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

//! Configuration for visit store behavior

use serde::{Deserialize, Serialize};

use crate::resilience::ConflictPolicy;

/// Default number of visits committed together under one sequence number
pub const DEFAULT_BATCH_CAP: usize = 10;

/// Default number of newest batches inspected when seeding a sequence counter.
///
/// More than one so a legacy row with a non-numeric `seqId` at the top of
/// the ordering does not hide the real maximum.
pub const DEFAULT_SEQ_PROBE_LIMIT: usize = 4;

/// Default cap on point reads a single cursor read issues for gaps
pub const DEFAULT_BACKFILL_LIMIT: usize = 256;

/// Configuration for the visit store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum visits per committed batch
    #[serde(default = "default_batch_cap")]
    pub batch_cap: usize,

    /// Query limit used by the sequence allocator on a cache miss
    #[serde(default = "default_seq_probe_limit")]
    pub seq_probe_limit: usize,

    /// Most gaps below the new cursor that one read point-reads
    #[serde(default = "default_backfill_limit")]
    pub backfill_limit: usize,

    #[serde(default)]
    pub conflict: ConflictPolicy,
}

fn default_batch_cap() -> usize {
    DEFAULT_BATCH_CAP
}

fn default_seq_probe_limit() -> usize {
    DEFAULT_SEQ_PROBE_LIMIT
}

fn default_backfill_limit() -> usize {
    DEFAULT_BACKFILL_LIMIT
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_cap: DEFAULT_BATCH_CAP,
            seq_probe_limit: DEFAULT_SEQ_PROBE_LIMIT,
            backfill_limit: DEFAULT_BACKFILL_LIMIT,
            conflict: ConflictPolicy::default(),
        }
    }
}

impl StoreConfig {
    pub fn with_batch_cap(mut self, batch_cap: usize) -> Self {
        self.batch_cap = batch_cap;
        self
    }

    pub fn with_conflict_policy(mut self, conflict: ConflictPolicy) -> Self {
        self.conflict = conflict;
        self
    }

    /// Batch cap clamped to at least one visit.
    pub fn effective_batch_cap(&self) -> usize {
        self.batch_cap.max(1)
    }
}
