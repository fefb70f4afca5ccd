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

//! Process-local mutable state of the visit store.
//!
//! One `StoreState` belongs to one process (or one simulated process in
//! tests). It is never shared across processes; the backing store's
//! conflict signal is the only thing coordinating separate states.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::write_queue::PendingAppend;

/// Process-local caches and write-queue registry.
#[derive(Default)]
pub struct StoreState {
    /// target -> lowest seqId not yet known to be used
    pub(crate) seq_marks: DashMap<String, u64>,

    /// target -> sender of its running drain task.
    ///
    /// An entry exists exactly while a drain task owns the target. Tasks
    /// remove their entry under this lock after seeing an empty channel.
    pub(crate) writers: Mutex<HashMap<String, mpsc::UnboundedSender<PendingAppend>>>,
}

impl StoreState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets with a cached sequence mark.
    pub fn cached_targets(&self) -> usize {
        self.seq_marks.len()
    }

    /// Targets with a drain in flight.
    pub fn active_writers(&self) -> usize {
        self.writers.lock().len()
    }
}
