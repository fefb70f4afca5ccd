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

//! URI:teller Server
//!
//! HTTP edge, work queue and enrichment worker around the visit store.
//!
//! ```text
//! GET /{trap} ──► publish VisitEvent ──► queue ──► Worker ──► VisitStore::append
//! GET /{view}.json?cursor=N ─────────────────────────────────► VisitStore::list
//! ```

pub mod api;
pub mod config;
pub mod queue;
pub mod worker;

use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uriteller_storage::{MemoryStore, VisitStore};

use api::{health_check, new_pair, page, page_with_suffix, AppState};
use config::ServerConfig;
use queue::{MemoryQueue, WorkQueue};
use worker::{Enricher, NoopEnricher, Worker};

/// Build the application router over `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/new", get(new_pair))
        .route("/:page", get(page))
        .route("/:page/*suffix", get(page_with_suffix))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Wire the store, queue and (optionally) the worker from `config`.
///
/// The worker subscribes before this returns, so no trap hit published
/// afterwards is dropped for lack of a subscription.
pub async fn build_state(config: &ServerConfig, enricher: Arc<dyn Enricher>) -> Result<AppState> {
    let store = VisitStore::new(Arc::new(MemoryStore::new()), config.store.clone());
    let queue = Arc::new(MemoryQueue::new(config.queue.redelivery_delay()));

    if config.worker.enabled {
        let subscription = queue
            .subscribe(&config.queue.topic, &config.queue.subscription)
            .await?;
        let worker = Worker::new(store.clone(), enricher, config.worker.max_in_progress);
        tokio::spawn(worker.run(subscription));
    } else {
        tracing::warn!("Enrichment worker disabled; trap hits will not be stored by this process");
    }

    Ok(AppState::new(
        store,
        queue,
        config.base_url(),
        &config.queue.topic,
    ))
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "uriteller_server=info,uriteller_storage=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting URI:teller Server");
    tracing::info!("Configuration: {:#?}", config);

    config.validate()?;
    let addr = config.socket_addr()?;

    let state = build_state(&config, Arc::new(NoopEnricher)).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        futures::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
