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

//! URI:teller Storage Layer
//!
//! Visit storage over a key-value store whose only concurrency primitive is
//! a conditional insert that fails when the key already exists.
//!
//! ## Architecture
//!
//! - **ItemStore**: trap/view pairs, created atomically
//! - **SequenceAllocator**: per-target next-sequence hints, cached per process
//! - **VisitWriteQueue**: per-target FIFO that commits visits in numbered batches
//! - **VisitReader**: cursor reads with point-read back-fill
//!
//! Separate processes coordinate only through insert conflicts. Everything
//! process-local lives in [`StoreState`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uriteller_core::StoreConfig;
//! use uriteller_storage::{MemoryStore, VisitStore};
//!
//! let store = VisitStore::new(Arc::new(MemoryStore::new()), StoreConfig::default());
//! let view_id = store.create().await?;
//! ```

pub mod backend;
pub mod codec;
pub mod item_store;
pub mod memory;
pub mod reader;
pub mod sequence;
pub mod state;
pub mod visit_store;
pub mod write_queue;

pub use backend::{compare_values, ConditionalStore, Entity, Query};
pub use item_store::{IdSource, ItemStore};
pub use memory::{MemoryStore, MemoryStoreStats, StoreOp};
pub use reader::VisitReader;
pub use sequence::SequenceAllocator;
pub use state::StoreState;
pub use visit_store::VisitStore;
pub use write_queue::{VisitWriteQueue, WriteStats};
