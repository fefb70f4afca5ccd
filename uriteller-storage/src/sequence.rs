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

//! Per-target sequence number candidates.
//!
//! The cached mark is only a hint: it saves a query per write on hot
//! targets. Correctness comes from the conditional insert, which rejects a
//! stale candidate and makes the writer ratchet forward.

use std::sync::Arc;
use tracing::debug;
use uriteller_core::{EntityKind, StoreError, StoreResult};

use crate::backend::{ConditionalStore, Query};
use crate::codec::{seq_id_of, SEQ_ID, TARGET};
use crate::state::StoreState;

#[derive(Clone)]
pub struct SequenceAllocator {
    backend: Arc<dyn ConditionalStore>,
    state: Arc<StoreState>,
    probe_limit: usize,
}

impl SequenceAllocator {
    pub fn new(backend: Arc<dyn ConditionalStore>, state: Arc<StoreState>, probe_limit: usize) -> Self {
        Self {
            backend,
            state,
            probe_limit: probe_limit.max(1),
        }
    }

    /// Sequence number to attempt next for `target`.
    ///
    /// Reading does not reserve anything: two callers may get the same
    /// candidate, and the loser of the insert race ratchets past it.
    pub async fn next_candidate(&self, target: &str) -> StoreResult<u64> {
        if let Some(mark) = self.cached(target) {
            return Ok(mark);
        }

        let candidate = match self.query_max(target).await? {
            Some(max) => max.checked_add(1).ok_or_else(|| StoreError::SequenceExhausted {
                target: target.to_string(),
            })?,
            None => 0,
        };
        debug!(target, candidate, "Seeded sequence mark from store");

        self.advance(target, candidate);
        Ok(self.cached(target).unwrap_or(candidate))
    }

    /// Raise the mark for `target` to `seq_id`; never lowers it.
    pub fn advance(&self, target: &str, seq_id: u64) {
        self.state
            .seq_marks
            .entry(target.to_string())
            .and_modify(|mark| {
                if seq_id > *mark {
                    *mark = seq_id;
                }
            })
            .or_insert(seq_id);
    }

    /// Cached mark for `target`, without touching the store.
    pub fn cached(&self, target: &str) -> Option<u64> {
        self.state.seq_marks.get(target).map(|mark| *mark)
    }

    /// Drop the cached mark so the next candidate is re-read from the store.
    pub fn forget(&self, target: &str) {
        self.state.seq_marks.remove(target);
    }

    async fn query_max(&self, target: &str) -> StoreResult<Option<u64>> {
        let query = Query::new(EntityKind::Visit)
            .filter_eq(TARGET, target)
            .order_desc(SEQ_ID)
            .limit(self.probe_limit);

        let entities = self.backend.query(&query).await?;
        Ok(entities.iter().filter_map(seq_id_of).max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Entity;
    use crate::codec::encode_batch;
    use crate::memory::{MemoryStore, StoreOp};
    use serde_json::json;
    use uriteller_core::{EntityKey, StoreError};

    fn allocator(store: &Arc<MemoryStore>) -> SequenceAllocator {
        SequenceAllocator::new(store.clone(), Arc::new(StoreState::new()), 4)
    }

    #[tokio::test]
    async fn test_empty_target_starts_at_zero() {
        let store = Arc::new(MemoryStore::new());
        let alloc = allocator(&store);

        assert_eq!(alloc.next_candidate("t").await.unwrap(), 0);
        assert_eq!(alloc.cached("t"), Some(0));
    }

    #[tokio::test]
    async fn test_seeds_from_committed_max() {
        let store = Arc::new(MemoryStore::new());
        for seq in [0, 1, 4] {
            store.put(encode_batch("t", seq, &json!([])));
        }
        store.put(encode_batch("other", 9, &json!([])));

        let alloc = allocator(&store);
        assert_eq!(alloc.next_candidate("t").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_reads_are_not_reservations() {
        let store = Arc::new(MemoryStore::new());
        let alloc = allocator(&store);

        assert_eq!(alloc.next_candidate("t").await.unwrap(), 0);
        assert_eq!(alloc.next_candidate("t").await.unwrap(), 0);
        // Second read is served from the cache
        assert_eq!(store.stats().queries, 1);
    }

    #[tokio::test]
    async fn test_advance_is_monotonic() {
        let store = Arc::new(MemoryStore::new());
        let alloc = allocator(&store);

        alloc.advance("t", 5);
        alloc.advance("t", 3);
        assert_eq!(alloc.cached("t"), Some(5));
        alloc.advance("t", 6);
        assert_eq!(alloc.next_candidate("t").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_skips_malformed_rows() {
        let store = Arc::new(MemoryStore::new());
        store.put(encode_batch("t", 2, &json!([])));
        store.put(Entity::new(
            EntityKey::new(EntityKind::Visit, "legacy/t"),
            json!({"target": "t", "seqId": "not-a-number"}),
        ));
        store.put(Entity::new(
            EntityKey::new(EntityKind::Visit, "legacy2/t"),
            json!({"target": "t", "timestamp": 1}),
        ));

        let alloc = allocator(&store);
        assert_eq!(alloc.next_candidate("t").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_forget_requeries() {
        let store = Arc::new(MemoryStore::new());
        let alloc = allocator(&store);
        assert_eq!(alloc.next_candidate("t").await.unwrap(), 0);

        store.put(encode_batch("t", 0, &json!([])));
        alloc.forget("t");
        assert_eq!(alloc.next_candidate("t").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_failure_leaves_cache_empty() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(StoreOp::Query, "deadline exceeded");
        let alloc = allocator(&store);

        let err = alloc.next_candidate("t").await.unwrap_err();
        assert_eq!(err, StoreError::Failure("deadline exceeded".into()));
        assert_eq!(alloc.cached("t"), None);
    }

    #[tokio::test]
    async fn test_batch_at_last_number_exhausts_target() {
        let store = Arc::new(MemoryStore::new());
        store.put(encode_batch("t", u64::MAX, &json!([])));
        let alloc = allocator(&store);

        let err = alloc.next_candidate("t").await.unwrap_err();
        assert_eq!(err, StoreError::SequenceExhausted { target: "t".into() });
        assert_eq!(alloc.cached("t"), None);
    }
}
