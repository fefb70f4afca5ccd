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

//! Enrichment worker.
//!
//! Consumes trap hits from the work queue, annotates each with what can be
//! learned about the client address, and appends it to the visit store.
//! A delivery is acknowledged only after its visit is committed; anything
//! else leaves it to be redelivered.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uriteller_storage::VisitStore;

use crate::queue::{Delivery, Subscription};

/// What is known about one client address.
///
/// `None` fields are stored as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Enrichment {
    /// Reverse DNS names
    pub reverse: Option<Vec<String>>,
    pub asns: Option<Vec<AsnInfo>>,
    /// ISO 3166 country code
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AsnInfo {
    pub asn: String,
    pub names: Vec<String>,
}

/// Address lookups performed before a visit is stored.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, ip: &str) -> anyhow::Result<Enrichment>;
}

/// Enricher that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnricher;

#[async_trait]
impl Enricher for NoopEnricher {
    async fn enrich(&self, _ip: &str) -> anyhow::Result<Enrichment> {
        Ok(Enrichment::default())
    }
}

/// Result of handling one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Visit committed, delivery acked
    Stored,
    /// Nothing to record, delivery acked
    Skipped,
    /// Delivery left unacked for redelivery
    Failed,
}

#[derive(Clone)]
pub struct Worker {
    store: VisitStore,
    enricher: Arc<dyn Enricher>,
    in_progress: Arc<Semaphore>,
}

impl Worker {
    pub fn new(store: VisitStore, enricher: Arc<dyn Enricher>, max_in_progress: usize) -> Self {
        Self {
            store,
            enricher,
            in_progress: Arc::new(Semaphore::new(max_in_progress.max(1))),
        }
    }

    /// Process deliveries until the subscription closes.
    #[tracing::instrument(skip_all, fields(subscription = %subscription.name()))]
    pub async fn run(self, mut subscription: Subscription) {
        info!("Enrichment worker started");

        while let Some(delivery) = subscription.next().await {
            let permit = match self.in_progress.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let worker = self.clone();
            tokio::spawn(async move {
                worker.handle(delivery).await;
                drop(permit);
            });
        }

        info!("Subscription closed, enrichment worker stopping");
    }

    /// Handle one delivery, acking it unless it should be retried.
    pub async fn handle(&self, delivery: Delivery) -> Outcome {
        let event = delivery.event();
        let Some(ip) = event.ip() else {
            debug!(target = %event.target, "Visit without client address, dropping");
            delivery.ack();
            return Outcome::Skipped;
        };

        let enrichment = match self.enricher.enrich(ip).await {
            Ok(enrichment) => enrichment,
            Err(e) => {
                warn!(target = %event.target, attempt = delivery.attempt(), error = %e, "Enrichment failed");
                return Outcome::Failed;
            }
        };

        let info = match merge(&event.info, &enrichment) {
            Ok(info) => info,
            Err(e) => {
                warn!(target = %event.target, error = %e, "Cannot encode enrichment");
                return Outcome::Failed;
            }
        };

        match self.store.append(&event.target, event.timestamp, info).await {
            Ok(()) => {
                debug!(target = %event.target, "Visit stored");
                delivery.ack();
                Outcome::Stored
            }
            Err(e) => {
                warn!(
                    target = %event.target,
                    attempt = delivery.attempt(),
                    error = %e,
                    "Storing visit failed, leaving for redelivery"
                );
                Outcome::Failed
            }
        }
    }
}

fn merge(info: &Value, enrichment: &Enrichment) -> serde_json::Result<Value> {
    let mut merged = match info {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };
    if let Value::Object(extra) = serde_json::to_value(enrichment)? {
        merged.extend(extra);
    }
    Ok(Value::Object(merged))
}
