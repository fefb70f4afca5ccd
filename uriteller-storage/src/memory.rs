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

//! In-process backing store.
//!
//! `MemoryStore` implements [`ConditionalStore`] over a `BTreeMap`. Every
//! operation yields to the scheduler first, so concurrent writers interleave
//! the way they would against a networked store.
//!
//! Two knobs make the eventual-consistency paths testable:
//!
//! - **Query lag**: while enabled, inserted keys stay invisible to
//!   [`ConditionalStore::query`] (point reads still see them) until
//!   [`MemoryStore::reveal_all`] is called.
//! - **Fault injection**: [`MemoryStore::fail_next`] queues a failure for the
//!   next call of one operation.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;
use uriteller_core::{EntityKey, StoreError, StoreResult};

use crate::backend::{ConditionalStore, Entity, Query};

/// Backing store operations, for fault injection and accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    GetMany,
    Insert,
    InsertAll,
    Query,
}

/// Operation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub gets: u64,
    pub inserts: u64,
    pub conflicts: u64,
    pub queries: u64,
}

#[derive(Default)]
struct Counters {
    gets: AtomicU64,
    inserts: AtomicU64,
    conflicts: AtomicU64,
    queries: AtomicU64,
}

/// In-memory [`ConditionalStore`].
#[derive(Default)]
pub struct MemoryStore {
    entities: RwLock<BTreeMap<EntityKey, Value>>,
    hidden: RwLock<HashSet<EntityKey>>,
    query_lag: AtomicBool,
    faults: Mutex<HashMap<StoreOp, VecDeque<String>>>,
    counters: Counters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write an entity unconditionally, bypassing conflict checks.
    ///
    /// Used to seed legacy or malformed rows.
    pub fn put(&self, entity: Entity) {
        self.track_lag(&entity.key);
        self.entities.write().insert(entity.key, entity.data);
    }

    /// While enabled, newly inserted keys are hidden from queries.
    pub fn set_query_lag(&self, enabled: bool) {
        self.query_lag.store(enabled, Ordering::SeqCst);
    }

    /// Hide one existing key from queries.
    pub fn hide(&self, key: &EntityKey) {
        self.hidden.write().insert(key.clone());
    }

    /// Make every hidden key visible to queries again.
    pub fn reveal_all(&self) {
        self.hidden.write().clear();
    }

    /// Fail the next call of `op` with a [`StoreError::Failure`].
    pub fn fail_next(&self, op: StoreOp, message: impl Into<String>) {
        self.faults
            .lock()
            .entry(op)
            .or_default()
            .push_back(message.into());
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Snapshot of every stored entity, in key order.
    pub fn entities(&self) -> Vec<Entity> {
        self.entities
            .read()
            .iter()
            .map(|(k, v)| Entity::new(k.clone(), v.clone()))
            .collect()
    }

    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            gets: self.counters.gets.load(Ordering::Relaxed),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            conflicts: self.counters.conflicts.load(Ordering::Relaxed),
            queries: self.counters.queries.load(Ordering::Relaxed),
        }
    }

    fn take_fault(&self, op: StoreOp) -> StoreResult<()> {
        let mut faults = self.faults.lock();
        match faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(message) => {
                debug!(?op, %message, "Injected store failure");
                Err(StoreError::Failure(message))
            }
            None => Ok(()),
        }
    }

    fn track_lag(&self, key: &EntityKey) {
        if self.query_lag.load(Ordering::SeqCst) {
            self.hidden.write().insert(key.clone());
        }
    }

    fn conflict(&self, key: &EntityKey) -> StoreError {
        self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
        StoreError::Conflict(key.clone())
    }
}

#[async_trait]
impl ConditionalStore for MemoryStore {
    async fn get(&self, key: &EntityKey) -> StoreResult<Option<Entity>> {
        tokio::task::yield_now().await;
        self.take_fault(StoreOp::Get)?;
        self.counters.gets.fetch_add(1, Ordering::Relaxed);

        Ok(self
            .entities
            .read()
            .get(key)
            .map(|data| Entity::new(key.clone(), data.clone())))
    }

    async fn get_many(&self, keys: &[EntityKey]) -> StoreResult<Vec<Entity>> {
        tokio::task::yield_now().await;
        self.take_fault(StoreOp::GetMany)?;
        self.counters.gets.fetch_add(1, Ordering::Relaxed);

        let entities = self.entities.read();
        Ok(keys
            .iter()
            .filter_map(|key| {
                entities
                    .get(key)
                    .map(|data| Entity::new(key.clone(), data.clone()))
            })
            .collect())
    }

    async fn insert(&self, entity: Entity) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.take_fault(StoreOp::Insert)?;
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);

        let mut entities = self.entities.write();
        if entities.contains_key(&entity.key) {
            return Err(self.conflict(&entity.key));
        }
        self.track_lag(&entity.key);
        entities.insert(entity.key, entity.data);
        Ok(())
    }

    async fn insert_all(&self, batch: Vec<Entity>) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.take_fault(StoreOp::InsertAll)?;
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);

        let mut entities = self.entities.write();
        {
            let mut seen = HashSet::with_capacity(batch.len());
            for entity in &batch {
                if entities.contains_key(&entity.key) || !seen.insert(&entity.key) {
                    return Err(self.conflict(&entity.key));
                }
            }
        }
        for entity in batch {
            self.track_lag(&entity.key);
            entities.insert(entity.key, entity.data);
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Entity>> {
        tokio::task::yield_now().await;
        self.take_fault(StoreOp::Query)?;
        self.counters.queries.fetch_add(1, Ordering::Relaxed);

        let visible: Vec<Entity> = {
            let entities = self.entities.read();
            let hidden = self.hidden.read();
            entities
                .iter()
                .filter(|(key, _)| key.kind == query.kind && !hidden.contains(*key))
                .map(|(k, v)| Entity::new(k.clone(), v.clone()))
                .collect()
        };
        Ok(query.apply(visible))
    }
}
