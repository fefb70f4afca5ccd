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

//! Entity keys for the backing store.
//!
//! ## Key Encoding
//!
//! - Items: `Item/{id}`
//! - Visit batches: `Visit/{seq_id}/{target}`
//!
//! The visit key is the only point where concurrent writers for one target
//! can collide, so it doubles as the sequence-number lock.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity kinds stored by the visit store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Item,
    Visit,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Item => "Item",
            EntityKind::Visit => "Visit",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(kind, name)` key addressing one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub name: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Key of the item with the given id.
    pub fn item(id: &str) -> Self {
        Self::new(EntityKind::Item, id)
    }

    /// Key of the visit batch committed at `seq_id` for `target`.
    pub fn visit(target: &str, seq_id: u64) -> Self {
        Self::new(EntityKind::Visit, format!("{}/{}", seq_id, target))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}
