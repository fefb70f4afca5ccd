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

//! Trap/view item pairs.

use std::sync::Arc;
use tracing::{debug, warn};
use uriteller_core::{generate_id, EntityKey, Item, StoreError, StoreResult};

use crate::backend::ConditionalStore;
use crate::codec::{decode_item, encode_item};

/// Source of fresh item ids.
pub type IdSource = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone)]
pub struct ItemStore {
    backend: Arc<dyn ConditionalStore>,
    ids: IdSource,
}

impl ItemStore {
    pub fn new(backend: Arc<dyn ConditionalStore>) -> Self {
        Self::with_id_source(backend, Arc::new(generate_id))
    }

    pub fn with_id_source(backend: Arc<dyn ConditionalStore>, ids: IdSource) -> Self {
        Self { backend, ids }
    }

    /// Create a trap/view pair and return the view id.
    pub async fn create(&self) -> StoreResult<String> {
        let (_, view) = self.create_pair().await?;
        Ok(view.id)
    }

    /// Create a trap/view pair.
    ///
    /// Both items are inserted in one transaction. If either id is already
    /// taken, both are regenerated and the transaction retried.
    pub async fn create_pair(&self) -> StoreResult<(Item, Item)> {
        loop {
            let trap = Item {
                id: (self.ids)(),
                is_view: false,
                other: String::new(),
            };
            let view = Item {
                id: (self.ids)(),
                is_view: true,
                other: trap.id.clone(),
            };
            let trap = Item {
                other: view.id.clone(),
                ..trap
            };

            match self.insert_pair(&trap, &view).await {
                Ok(()) => {
                    debug!(trap = %trap.id, view = %view.id, "Created item pair");
                    return Ok((trap, view));
                }
                Err(StoreError::IdCollision) => {
                    warn!(trap = %trap.id, view = %view.id, "Item id collision, regenerating");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Look up one item. Absent ids are `Ok(None)`.
    pub async fn get(&self, id: &str) -> StoreResult<Option<Item>> {
        match self.backend.get(&EntityKey::item(id)).await? {
            Some(entity) => decode_item(entity).map(Some),
            None => Ok(None),
        }
    }

    async fn insert_pair(&self, trap: &Item, view: &Item) -> StoreResult<()> {
        let entities = vec![encode_item(trap)?, encode_item(view)?];
        self.backend
            .insert_all(entities)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => StoreError::IdCollision,
                other => other,
            })
    }
}
