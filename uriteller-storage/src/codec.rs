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

//! Entity encoding for items and visit batches.
//!
//! Stored shapes:
//!
//! ```text
//! Item/{id}                 {"isView": bool, "other": id}
//! Visit/{seq_id}/{target}   {"target": id, "seqId": n, "visits": [{"timestamp", "info"}]}
//! ```
//!
//! Older deployments wrote one visit per entity without a `seqId`; those
//! rows decode as malformed and are skipped by readers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uriteller_core::{EntityKey, Item, StoreError, StoreResult, Visit, VisitBatch};

use crate::backend::Entity;

/// Property holding the sequence number of a visit batch
pub const SEQ_ID: &str = "seqId";

/// Property holding the monitored item id of a visit batch
pub const TARGET: &str = "target";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemData {
    is_view: bool,
    other: String,
}

pub fn encode_item(item: &Item) -> StoreResult<Entity> {
    let data = serde_json::to_value(ItemData {
        is_view: item.is_view,
        other: item.other.clone(),
    })?;
    Ok(Entity::new(EntityKey::item(&item.id), data))
}

pub fn decode_item(entity: Entity) -> StoreResult<Item> {
    let data: ItemData =
        serde_json::from_value(entity.data).map_err(|e| StoreError::MalformedEntity {
            key: entity.key.clone(),
            reason: e.to_string(),
        })?;
    Ok(Item {
        id: entity.key.name,
        is_view: data.is_view,
        other: data.other,
    })
}

/// Build the entity for a batch from pre-encoded visits.
///
/// The writer encodes a chunk once and re-keys it on every conflict.
pub fn encode_batch(target: &str, seq_id: u64, visits: &Value) -> Entity {
    Entity::new(
        EntityKey::visit(target, seq_id),
        json!({
            TARGET: target,
            SEQ_ID: seq_id,
            "visits": visits,
        }),
    )
}

/// Sequence number of a stored batch, if it has a usable one.
pub fn seq_id_of(entity: &Entity) -> Option<u64> {
    entity.property(SEQ_ID).and_then(Value::as_u64)
}

pub fn decode_batch(entity: Entity) -> StoreResult<VisitBatch> {
    let malformed = |reason: String| StoreError::MalformedEntity {
        key: entity.key.clone(),
        reason,
    };

    let seq_id = seq_id_of(&entity).ok_or_else(|| malformed("missing or non-numeric seqId".into()))?;
    let target = match entity.property(TARGET).and_then(Value::as_str) {
        Some(target) => target.to_string(),
        None => return Err(malformed("missing target".into())),
    };
    let visits = match entity.property("visits") {
        Some(visits) => Vec::<Visit>::deserialize(visits).map_err(|e| malformed(e.to_string()))?,
        None => return Err(malformed("missing visits".into())),
    };

    Ok(VisitBatch {
        target,
        seq_id,
        visits,
    })
}
