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

//! Trap and view pages.

use axum::{
    extract::{ConnectInfo, OriginalUri, Path, RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use tracing::{debug, info};
use uriteller_core::{is_page_id, Item, VisitEvent};

use crate::api::visits::{parse_cursor, visits_for, MonitorResponse};
use crate::api::{ApiError, AppState};

/// Served for every trap hit. Reveals nothing about the pair.
const TRAP_PAGE: &str = "<!doctype html>\n<html lang=\"en\"><head><meta charset=\"utf-8\"><title>Not Found</title></head>\
<body><h1>Not Found</h1><p>The requested page does not exist.</p></body></html>\n";

/// Request details recorded with a trap hit.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HitInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    referrer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_agent: Option<String>,
    protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suffix: Option<String>,
}

/// GET /new - create a pair and send the client to its view
#[tracing::instrument(skip(state))]
pub async fn new_pair(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    let view_id = state.store.create().await?;
    info!(view = %view_id, "Created monitor");
    Ok(Redirect::to(&state.url(&view_id)))
}

/// GET /{id} and GET /{viewId}.json
#[tracing::instrument(skip(state, uri, query, headers, peer))]
pub async fn page(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    OriginalUri(uri): OriginalUri,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Result<Response, ApiError> {
    let (id, json) = match segment.strip_suffix(".json") {
        Some(id) => (id, true),
        None => (segment.as_str(), false),
    };
    let item = lookup(&state, id).await?;

    if item.is_trap() {
        // Only views have a JSON document
        if json {
            return Err(ApiError::NotFound(segment));
        }
        let request = TrapRequest::new(&uri, &headers, peer);
        return record_hit(&state, &item, request).await;
    }

    if json {
        let cursor = parse_cursor(query.as_deref())?;
        let data = visits_for(&state, &item, cursor).await?;
        return Ok(Json(data).into_response());
    }

    let data = visits_for(&state, &item, 0).await?;
    Ok(Json(MonitorResponse {
        update_url: state.url(&format!("{}.json", item.id)),
        data,
    })
    .into_response())
}

/// GET /{id}/{suffix...}
///
/// Only traps answer below their id; every other path is unknown.
#[tracing::instrument(skip(state, uri, headers, peer))]
pub async fn page_with_suffix(
    State(state): State<AppState>,
    Path((id, _suffix)): Path<(String, String)>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Result<Response, ApiError> {
    let item = lookup(&state, &id).await?;
    if !item.is_trap() {
        return Err(ApiError::NotFound(uri.path().to_string()));
    }

    let request = TrapRequest::new(&uri, &headers, peer);
    record_hit(&state, &item, request).await
}

async fn lookup(state: &AppState, id: &str) -> Result<Item, ApiError> {
    if !is_page_id(id) {
        return Err(ApiError::NotFound(id.to_string()));
    }
    state
        .store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(id.to_string()))
}

async fn record_hit(state: &AppState, trap: &Item, request: TrapRequest) -> Result<Response, ApiError> {
    let info = request.into_info(&trap.id);
    let event = VisitEvent {
        target: trap.id.clone(),
        timestamp: chrono::Utc::now().timestamp_millis(),
        info: serde_json::to_value(&info).map_err(|e| ApiError::Internal(e.to_string()))?,
    };

    state.queue.publish(&state.topic, event).await?;
    debug!(trap = %trap.id, "Trap hit published");

    Ok((StatusCode::NOT_FOUND, Html(TRAP_PAGE)).into_response())
}

/// What the edge knows about the client of a trap request.
struct TrapRequest {
    path_and_query: String,
    ip: Option<String>,
    referrer: Option<String>,
    user_agent: Option<String>,
    protocol: String,
}

impl TrapRequest {
    fn new(uri: &http::Uri, headers: &HeaderMap, peer: Option<ConnectInfo<SocketAddr>>) -> Self {
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string());

        Self {
            path_and_query,
            ip: client_ip(headers, peer.map(|ConnectInfo(addr)| addr)),
            referrer: header(headers, "referer").or_else(|| header(headers, "referrer")),
            user_agent: header(headers, "user-agent"),
            protocol: first_entry(headers, "x-forwarded-proto").unwrap_or_else(|| "http".into()),
        }
    }

    /// Everything after `/{id}` in the request target, if anything.
    fn into_info(self, id: &str) -> HitInfo {
        let suffix = self
            .path_and_query
            .strip_prefix('/')
            .and_then(|rest| rest.strip_prefix(id))
            .filter(|rest| !rest.is_empty())
            .map(str::to_string);

        HitInfo {
            ip: self.ip,
            referrer: self.referrer,
            user_agent: self.user_agent,
            protocol: self.protocol,
            suffix,
        }
    }
}

/// First `X-Forwarded-For` entry, else the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    first_entry(headers, "x-forwarded-for").or_else(|| peer.map(|addr| addr.ip().to_string()))
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn first_entry(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = header(headers, name)?;
    value
        .split(',')
        .next()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
