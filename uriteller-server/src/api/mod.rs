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

//! HTTP handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use uriteller_core::StoreError;
use uriteller_storage::VisitStore;

use crate::queue::{QueueError, WorkQueue};

pub mod health;
pub mod pages;
pub mod visits;

pub use health::health_check;
pub use pages::{new_pair, page, page_with_suffix};

/// API error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!("Request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: VisitStore,
    pub queue: Arc<dyn WorkQueue>,
    /// Public base URL, without a trailing slash
    pub base_url: Arc<str>,
    /// Topic trap hits are published to
    pub topic: Arc<str>,
}

impl AppState {
    pub fn new(
        store: VisitStore,
        queue: Arc<dyn WorkQueue>,
        base_url: &str,
        topic: &str,
    ) -> Self {
        Self {
            store,
            queue,
            base_url: base_url.trim_end_matches('/').into(),
            topic: topic.into(),
        }
    }

    /// Absolute URL of `path` under the base URL
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}
