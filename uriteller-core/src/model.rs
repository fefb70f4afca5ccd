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

//! Items, visits and visit batches.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One endpoint of a trap/view pair.
///
/// Items are created in pairs and never change afterwards:
/// `get(trap.other) == view` and `get(view.other) == trap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub is_view: bool,
    /// Id of the paired item
    pub other: String,
}

impl Item {
    pub fn is_trap(&self) -> bool {
        !self.is_view
    }
}

/// A single recorded visit.
///
/// `info` is owned by the edge and the enrichment worker; the store never
/// looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub info: Value,
}

impl Visit {
    pub fn new(timestamp: i64, info: Value) -> Self {
        Self { timestamp, info }
    }
}

/// Visits committed together under one sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitBatch {
    pub target: String,
    pub seq_id: u64,
    pub visits: Vec<Visit>,
}

/// One page of a cursor read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitPage {
    /// Lowest sequence number not yet guaranteed observed
    pub cursor: u64,
    pub visits: Vec<Visit>,
}

/// Raw visit event carried by the work queue from the edge to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitEvent {
    pub target: String,
    pub timestamp: i64,
    pub info: Value,
}

impl VisitEvent {
    /// Client IP recorded by the edge, if any.
    pub fn ip(&self) -> Option<&str> {
        self.info.get("ip").and_then(Value::as_str)
    }
}
