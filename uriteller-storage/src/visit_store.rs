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

//! Visit store facade.
//!
//! Wires the item store, sequence allocator, write queue and reader around
//! one backend and one process-local [`StoreState`].

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::info;
use uriteller_core::{Item, StoreConfig, StoreResult, VisitPage};

use crate::backend::ConditionalStore;
use crate::item_store::{IdSource, ItemStore};
use crate::reader::VisitReader;
use crate::sequence::SequenceAllocator;
use crate::state::StoreState;
use crate::write_queue::{VisitWriteQueue, WriteStats};

/// One process's view of the visit store.
///
/// Clones share state. Two stores built with `new` over the same backend
/// behave like two independent processes.
#[derive(Clone)]
pub struct VisitStore {
    items: ItemStore,
    allocator: SequenceAllocator,
    writer: VisitWriteQueue,
    reader: VisitReader,
    state: Arc<StoreState>,
    config: StoreConfig,
}

impl VisitStore {
    pub fn new(backend: Arc<dyn ConditionalStore>, config: StoreConfig) -> Self {
        Self::build(ItemStore::new(backend.clone()), backend, config)
    }

    /// Like [`VisitStore::new`] with a custom item id source.
    pub fn with_id_source(
        backend: Arc<dyn ConditionalStore>,
        config: StoreConfig,
        ids: IdSource,
    ) -> Self {
        Self::build(ItemStore::with_id_source(backend.clone(), ids), backend, config)
    }

    fn build(items: ItemStore, backend: Arc<dyn ConditionalStore>, config: StoreConfig) -> Self {
        let state = Arc::new(StoreState::new());
        let allocator = SequenceAllocator::new(backend.clone(), state.clone(), config.seq_probe_limit);
        let writer = VisitWriteQueue::new(
            backend.clone(),
            allocator.clone(),
            state.clone(),
            config.effective_batch_cap(),
            config.conflict.clone(),
        );
        let reader = VisitReader::new(backend, config.backfill_limit);

        info!(
            batch_cap = config.effective_batch_cap(),
            seq_probe_limit = config.seq_probe_limit,
            backfill_limit = config.backfill_limit,
            max_conflict_retries = ?config.conflict.max_retries,
            "Visit store ready"
        );

        Self {
            items,
            allocator,
            writer,
            reader,
            state,
            config,
        }
    }

    /// Create a trap/view pair and return the view id.
    pub async fn create(&self) -> StoreResult<String> {
        self.items.create().await
    }

    pub async fn create_pair(&self) -> StoreResult<(Item, Item)> {
        self.items.create_pair().await
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<Item>> {
        self.items.get(id).await
    }

    /// See [`VisitWriteQueue::append`].
    pub fn append(
        &self,
        target: &str,
        timestamp: i64,
        info: Value,
    ) -> impl Future<Output = StoreResult<()>> + Send + 'static {
        self.writer.append(target, timestamp, info)
    }

    pub async fn list(&self, target: &str, cursor: u64) -> StoreResult<VisitPage> {
        self.reader.list(target, cursor).await
    }

    pub fn items(&self) -> &ItemStore {
        &self.items
    }

    pub fn allocator(&self) -> &SequenceAllocator {
        &self.allocator
    }

    pub fn writer(&self) -> &VisitWriteQueue {
        &self.writer
    }

    pub fn reader(&self) -> &VisitReader {
        &self.reader
    }

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn write_stats(&self) -> WriteStats {
        self.writer.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_append_list() {
        let store = VisitStore::new(Arc::new(MemoryStore::new()), StoreConfig::default());

        let view_id = store.create().await.unwrap();
        let view = store.get(&view_id).await.unwrap().unwrap();
        let trap_id = view.other;

        store.append(&trap_id, 100, json!({"ip": "1.1.1.1"})).await.unwrap();
        store.append(&trap_id, 200, json!({"ip": "2.2.2.2"})).await.unwrap();

        let page = store.list(&trap_id, 0).await.unwrap();
        assert_eq!(page.cursor, 2);
        assert_eq!(page.visits.len(), 2);
        // Newest batch first
        assert_eq!(page.visits[0].timestamp, 200);
        assert_eq!(store.write_stats().batches_committed, 2);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = VisitStore::new(Arc::new(MemoryStore::new()), StoreConfig::default());
        let clone = store.clone();

        store.append("t", 1, json!({})).await.unwrap();
        assert_eq!(clone.allocator().cached("t"), Some(1));
        assert_eq!(clone.state().cached_targets(), 1);
    }

    #[tokio::test]
    async fn test_zero_batch_cap_is_clamped() {
        let config = StoreConfig::default().with_batch_cap(0);
        let store = VisitStore::new(Arc::new(MemoryStore::new()), config);

        let pending: Vec<_> = (0..3).map(|i| store.append("t", i, json!({}))).collect();
        for result in futures::future::join_all(pending).await {
            result.unwrap();
        }
        assert_eq!(store.list("t", 0).await.unwrap().cursor, 3);
    }
}
