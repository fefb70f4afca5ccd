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

//! URI:teller Core
//!
//! Data model, keys, ids and errors shared by the visit store and the server.

pub mod config;
pub mod error;
pub mod id;
pub mod key;
pub mod model;
pub mod resilience;

pub use config::{StoreConfig, DEFAULT_BACKFILL_LIMIT, DEFAULT_BATCH_CAP, DEFAULT_SEQ_PROBE_LIMIT};
pub use error::{StoreError, StoreResult};
pub use id::{generate_id, generate_id_with_bits, is_page_id, ID_BITS, ID_LEN};
pub use key::{EntityKey, EntityKind};
pub use model::{Item, Visit, VisitBatch, VisitEvent, VisitPage};
pub use resilience::{Backoff, ConflictPolicy};
