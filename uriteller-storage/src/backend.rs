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

//! Backing store capability.
//!
//! The visit store only needs four things from its backing store: point
//! reads, multi-key reads, conditional inserts that fail distinguishably
//! when the key exists, and a filtered/ordered query. Anything offering
//! those (a document database, an in-process map) can sit behind
//! [`ConditionalStore`].
//!
//! Key operations are expected to be strongly consistent. Queries may lag
//! behind inserts.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use uriteller_core::{EntityKey, EntityKind, StoreResult};

/// A schemaless stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub key: EntityKey,
    pub data: Value,
}

impl Entity {
    pub fn new(key: EntityKey, data: Value) -> Self {
        Self { key, data }
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

/// Filtered, ordered and limited query over one entity kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub kind: EntityKind,
    /// Equality filters, all of which must match
    pub equals: Vec<(String, Value)>,
    /// Numeric `property >= value` filter
    pub at_least: Option<(String, u64)>,
    /// Property to order by, descending
    pub order_desc: Option<String>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            equals: Vec::new(),
            at_least: None,
            order_desc: None,
            limit: None,
        }
    }

    pub fn filter_eq(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.equals.push((property.to_string(), value.into()));
        self
    }

    pub fn filter_gte(mut self, property: &str, value: u64) -> Self {
        self.at_least = Some((property.to_string(), value));
        self
    }

    pub fn order_desc(mut self, property: &str) -> Self {
        self.order_desc = Some(property.to_string());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `entity` passes the kind and filter clauses.
    pub fn matches(&self, entity: &Entity) -> bool {
        if entity.key.kind != self.kind {
            return false;
        }
        let equal = self
            .equals
            .iter()
            .all(|(prop, value)| entity.property(prop) == Some(value));
        if !equal {
            return false;
        }
        match &self.at_least {
            Some((prop, min)) => entity.property(prop).map_or(false, |v| numeric_at_least(v, *min)),
            None => true,
        }
    }

    /// Evaluate the query over a snapshot of entities.
    ///
    /// Ordering follows document-store rules: entities without the ordered
    /// property are excluded, and values order by type before value.
    pub fn apply(&self, entities: impl IntoIterator<Item = Entity>) -> Vec<Entity> {
        let mut results: Vec<Entity> = entities.into_iter().filter(|e| self.matches(e)).collect();

        if let Some(prop) = &self.order_desc {
            results.retain(|e| e.property(prop).is_some());
            results.sort_by(|a, b| compare_values(&b.data[prop.as_str()], &a.data[prop.as_str()]));
        }

        if let Some(limit) = self.limit {
            results.truncate(limit);
        }
        results
    }
}

fn numeric_at_least(value: &Value, min: u64) -> bool {
    value
        .as_u64()
        .map(|v| v >= min)
        .or_else(|| value.as_f64().map(|v| v >= min as f64))
        .unwrap_or(false)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over property values: null < bool < number < string < other.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    type_rank(a).cmp(&type_rank(b)).then_with(|| match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_u64(), y.as_u64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    })
}

/// Optimistic-concurrency store capability.
///
/// `insert` and `insert_all` must fail with [`StoreError::Conflict`] when a
/// key already exists; that signal is the only cross-process coordination
/// the visit store relies on.
///
/// [`StoreError::Conflict`]: uriteller_core::StoreError::Conflict
#[async_trait]
pub trait ConditionalStore: Send + Sync {
    /// Point read. Absent keys are `Ok(None)`.
    async fn get(&self, key: &EntityKey) -> StoreResult<Option<Entity>>;

    /// Multi-key read. Absent keys are omitted from the result.
    async fn get_many(&self, keys: &[EntityKey]) -> StoreResult<Vec<Entity>>;

    /// Insert `entity` only if its key does not exist yet.
    async fn insert(&self, entity: Entity) -> StoreResult<()>;

    /// Insert all entities in one transaction, or none if any key exists.
    async fn insert_all(&self, entities: Vec<Entity>) -> StoreResult<()>;

    /// Best-effort consistent query.
    async fn query(&self, query: &Query) -> StoreResult<Vec<Entity>>;
}
