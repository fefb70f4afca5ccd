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

//! Cursor reads over committed visit batches.
//!
//! Queries are eventually consistent, so a query can miss a batch that a
//! point read would find. The reader only advances the cursor past the
//! highest sequence number it actually saw, and back-fills the numbers
//! just below that with one multi-get before answering.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uriteller_core::{EntityKey, EntityKind, StoreResult, Visit, VisitPage};

use crate::backend::{ConditionalStore, Entity, Query};
use crate::codec::{decode_batch, seq_id_of, SEQ_ID, TARGET};

#[derive(Clone)]
pub struct VisitReader {
    backend: Arc<dyn ConditionalStore>,
    backfill_limit: usize,
}

impl VisitReader {
    /// `backfill_limit` caps the point reads of one `list` call; gaps further
    /// below the new cursor are treated as uncommitted.
    pub fn new(backend: Arc<dyn ConditionalStore>, backfill_limit: usize) -> Self {
        Self {
            backend,
            backfill_limit: backfill_limit.max(1),
        }
    }

    /// Visits of `target` at or above `cursor`, newest batch first.
    ///
    /// The returned cursor is `max(cursor, 1 + highest seqId seen)`. Passing
    /// it back returns only batches at or above it; batches below it that
    /// were still uncommitted when this call ran are never returned.
    pub async fn list(&self, target: &str, cursor: u64) -> StoreResult<VisitPage> {
        let query = Query::new(EntityKind::Visit)
            .filter_eq(TARGET, target)
            .filter_gte(SEQ_ID, cursor)
            .order_desc(SEQ_ID);

        let mut batches = BTreeMap::new();
        collect(&mut batches, self.backend.query(&query).await?);

        // A batch at u64::MAX has no successor; the cursor stays on it
        let next_cursor = match batches.keys().next_back() {
            Some(max) => cursor.max(max.saturating_add(1)),
            None => cursor,
        };

        // Walking down from the cursor visits at most `batches.len()` present
        // numbers before the limit is reached.
        let missing: Vec<EntityKey> = (cursor..next_cursor)
            .rev()
            .filter(|seq_id| !batches.contains_key(seq_id))
            .take(self.backfill_limit)
            .map(|seq_id| EntityKey::visit(target, seq_id))
            .collect();

        if !missing.is_empty() {
            let found = self.backend.get_many(&missing).await?;
            debug!(
                target,
                cursor,
                missing = missing.len(),
                found = found.len(),
                "Back-filled visit batches"
            );
            collect(&mut batches, found);
        }

        let visits = batches
            .into_values()
            .rev()
            .flatten()
            .collect();

        Ok(VisitPage {
            cursor: next_cursor,
            visits,
        })
    }
}

/// Decode `entities` into `batches` by sequence number.
///
/// A batch with a numeric `seqId` but unreadable visits still occupies its
/// number, with no visits; rows without one are skipped.
fn collect(batches: &mut BTreeMap<u64, Vec<Visit>>, entities: Vec<Entity>) {
    for entity in entities {
        let seq_id = seq_id_of(&entity);
        match (decode_batch(entity), seq_id) {
            (Ok(batch), _) => {
                batches.insert(batch.seq_id, batch.visits);
            }
            (Err(e), Some(seq_id)) => {
                debug!(seq_id, error = %e, "Skipping visits of unreadable batch");
                batches.entry(seq_id).or_default();
            }
            (Err(e), None) => debug!(error = %e, "Skipping malformed visit batch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_batch;
    use crate::memory::{MemoryStore, StoreOp};
    use serde_json::json;
    use uriteller_core::{StoreError, Visit};

    fn put_batch(store: &MemoryStore, target: &str, seq_id: u64, timestamps: &[i64]) {
        let visits: Vec<Visit> = timestamps.iter().map(|t| Visit::new(*t, json!({}))).collect();
        store.put(encode_batch(
            target,
            seq_id,
            &serde_json::to_value(visits).unwrap(),
        ));
    }

    fn timestamps(page: &VisitPage) -> Vec<i64> {
        page.visits.iter().map(|v| v.timestamp).collect()
    }

    #[tokio::test]
    async fn test_empty_target() {
        let store = Arc::new(MemoryStore::new());
        let reader = VisitReader::new(store.clone(), 64);

        let page = reader.list("t", 0).await.unwrap();
        assert_eq!(page.cursor, 0);
        assert!(page.visits.is_empty());

        // The cursor never moves backwards
        let page = reader.list("t", 7).await.unwrap();
        assert_eq!(page.cursor, 7);
    }

    #[tokio::test]
    async fn test_newest_batch_first_intra_batch_order_kept() {
        let store = Arc::new(MemoryStore::new());
        put_batch(&store, "t", 0, &[1, 2]);
        put_batch(&store, "t", 1, &[3, 4]);
        put_batch(&store, "other", 0, &[99]);

        let page = VisitReader::new(store.clone(), 64).list("t", 0).await.unwrap();
        assert_eq!(page.cursor, 2);
        assert_eq!(timestamps(&page), vec![3, 4, 1, 2]);
    }

    #[tokio::test]
    async fn test_cursor_excludes_older_batches() {
        let store = Arc::new(MemoryStore::new());
        for seq in 0..4 {
            put_batch(&store, "t", seq, &[seq as i64]);
        }

        let page = VisitReader::new(store.clone(), 64).list("t", 2).await.unwrap();
        assert_eq!(page.cursor, 4);
        assert_eq!(timestamps(&page), vec![3, 2]);
    }

    #[tokio::test]
    async fn test_backfills_batches_hidden_from_query() {
        let store = Arc::new(MemoryStore::new());
        put_batch(&store, "t", 0, &[10]);
        put_batch(&store, "t", 1, &[11]);
        put_batch(&store, "t", 2, &[12]);
        store.hide(&EntityKey::visit("t", 1));

        let page = VisitReader::new(store.clone(), 64).list("t", 0).await.unwrap();
        assert_eq!(page.cursor, 3);
        assert_eq!(timestamps(&page), vec![12, 11, 10]);
    }

    #[tokio::test]
    async fn test_uncommitted_gap_is_absent() {
        let store = Arc::new(MemoryStore::new());
        put_batch(&store, "t", 0, &[10]);
        put_batch(&store, "t", 2, &[12]);

        let page = VisitReader::new(store.clone(), 64).list("t", 0).await.unwrap();
        assert_eq!(page.cursor, 3);
        assert_eq!(timestamps(&page), vec![12, 10]);
    }

    #[tokio::test]
    async fn test_skips_malformed_entities() {
        let store = Arc::new(MemoryStore::new());
        put_batch(&store, "t", 0, &[10]);
        store.put(Entity::new(
            EntityKey::visit("t", 1),
            json!({"target": "t", "seqId": 1, "visits": "oops"}),
        ));
        store.put(Entity::new(
            EntityKey::new(EntityKind::Visit, "legacy"),
            json!({"target": "t", "timestamp": 5, "info": {}}),
        ));

        // The unreadable batch still moves the cursor past its number
        let page = VisitReader::new(store.clone(), 64).list("t", 0).await.unwrap();
        assert_eq!(page.cursor, 2);
        assert_eq!(timestamps(&page), vec![10]);
        assert_eq!(store.stats().gets, 0);
    }

    #[tokio::test]
    async fn test_unreadable_newest_batch_is_passed() {
        let store = Arc::new(MemoryStore::new());
        put_batch(&store, "t", 0, &[10]);
        store.put(Entity::new(
            EntityKey::visit("t", 1),
            json!({"target": "t", "seqId": 1}),
        ));

        let reader = VisitReader::new(store.clone(), 64);
        let page = reader.list("t", 0).await.unwrap();
        assert_eq!(page.cursor, 2);

        let page = reader.list("t", page.cursor).await.unwrap();
        assert_eq!(page.cursor, 2);
        assert!(page.visits.is_empty());
    }

    #[tokio::test]
    async fn test_last_sequence_number_does_not_overflow() {
        let store = Arc::new(MemoryStore::new());
        put_batch(&store, "t", u64::MAX, &[42]);

        let reader = VisitReader::new(store.clone(), 64);
        let page = reader.list("t", u64::MAX - 1).await.unwrap();
        assert_eq!(page.cursor, u64::MAX);
        assert_eq!(timestamps(&page), vec![42]);

        let page = reader.list("t", u64::MAX).await.unwrap();
        assert_eq!(page.cursor, u64::MAX);
    }

    #[tokio::test]
    async fn test_far_sequence_number_bounds_backfill() {
        let store = Arc::new(MemoryStore::new());
        put_batch(&store, "t", 1 << 33, &[7]);

        let page = VisitReader::new(store.clone(), 64).list("t", 0).await.unwrap();
        assert_eq!(page.cursor, (1 << 33) + 1);
        assert_eq!(timestamps(&page), vec![7]);
        assert_eq!(store.stats().gets, 1);
    }

    #[tokio::test]
    async fn test_backfill_reads_nearest_gaps_first() {
        let store = Arc::new(MemoryStore::new());
        for seq in 0..6 {
            put_batch(&store, "t", seq, &[seq as i64]);
        }
        for seq in [1, 3, 4] {
            store.hide(&EntityKey::visit("t", seq));
        }

        // Only the two gaps nearest the new cursor are point-read
        let page = VisitReader::new(store.clone(), 2).list("t", 0).await.unwrap();
        assert_eq!(page.cursor, 6);
        assert_eq!(timestamps(&page), vec![5, 4, 3, 0]);
    }

    #[tokio::test]
    async fn test_backfill_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        put_batch(&store, "t", 0, &[10]);
        put_batch(&store, "t", 1, &[11]);
        store.hide(&EntityKey::visit("t", 0));
        store.fail_next(StoreOp::GetMany, "unavailable");

        let err = VisitReader::new(store.clone(), 64).list("t", 0).await.unwrap_err();
        assert_eq!(err, StoreError::Failure("unavailable".into()));
    }

    #[tokio::test]
    async fn test_no_point_reads_without_gaps() {
        let store = Arc::new(MemoryStore::new());
        put_batch(&store, "t", 0, &[10]);

        VisitReader::new(store.clone(), 64).list("t", 0).await.unwrap();
        assert_eq!(store.stats().gets, 0);
    }
}
