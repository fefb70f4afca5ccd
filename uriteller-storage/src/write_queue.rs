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

//! Visit Write Queue - Per-Target Batching Writer
//!
//! Appends for one target are funnelled through a single drain task that
//! commits them in chunks of at most `batch_cap` visits, one conditional
//! insert at a time.
//!
//! ## Architecture
//!
//! ```text
//! append(T) ─┬─► channel(T) ─► drain task(T) ─► next_candidate(T)
//! append(T) ─┤                     │                  │
//! append(T) ─┘                     │            insert Visit/{seq}/T
//!                                  │                  │
//!                                  │   ┌── ok ────────┤── conflict ──┐
//!                                  │   ▼              │              ▼
//!                                  │ advance(seq+1)   │        advance(seq+1)
//!                                  │ complete chunk   │        same chunk, retry
//!                                  ▼                  ▼
//!                        channel empty -> task retires (Idle)
//! ```
//!
//! ## Guarantees
//!
//! - Per target, per process: at most one insert outstanding.
//! - Visits commit in arrival order across chunk boundaries.
//! - A conflicting attempt persists nothing, so retrying the same chunk
//!   under the next sequence number neither loses nor duplicates visits.
//! - Any other store error fails the whole chunk. Redelivery from the
//!   upstream work queue is the recovery path.

use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uriteller_core::{ConflictPolicy, StoreError, StoreResult, Visit};

use crate::backend::ConditionalStore;
use crate::codec::encode_batch;
use crate::sequence::SequenceAllocator;
use crate::state::StoreState;

/// One queued append and its completion handle.
pub(crate) struct PendingAppend {
    visit: Visit,
    done: oneshot::Sender<StoreResult<()>>,
}

/// Statistics for the write queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub batches_committed: u64,
    pub visits_committed: u64,
    pub sequence_conflicts: u64,
    pub batches_failed: u64,
    pub visits_failed: u64,
    /// Appends accepted but not yet completed
    pub pending: u64,
}

#[derive(Default)]
struct WriteStatsInternal {
    batches_committed: AtomicU64,
    visits_committed: AtomicU64,
    sequence_conflicts: AtomicU64,
    batches_failed: AtomicU64,
    visits_failed: AtomicU64,
    pending: AtomicU64,
}

impl WriteStatsInternal {
    fn snapshot(&self) -> WriteStats {
        WriteStats {
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            visits_committed: self.visits_committed.load(Ordering::Relaxed),
            sequence_conflicts: self.sequence_conflicts.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            visits_failed: self.visits_failed.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    backend: Arc<dyn ConditionalStore>,
    allocator: SequenceAllocator,
    state: Arc<StoreState>,
    batch_cap: usize,
    conflict: ConflictPolicy,
    stats: WriteStatsInternal,
}

/// Per-target FIFO batching writer.
#[derive(Clone)]
pub struct VisitWriteQueue {
    shared: Arc<Shared>,
}

impl VisitWriteQueue {
    pub fn new(
        backend: Arc<dyn ConditionalStore>,
        allocator: SequenceAllocator,
        state: Arc<StoreState>,
        batch_cap: usize,
        conflict: ConflictPolicy,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                allocator,
                state,
                batch_cap: batch_cap.max(1),
                conflict,
                stats: WriteStatsInternal::default(),
            }),
        }
    }

    /// Queue a visit for `target`.
    ///
    /// The visit joins the target's queue before this returns, so call
    /// order is commit order even when the futures are awaited later.
    /// Dropping the future does not cancel the write.
    ///
    /// Must be called from within a tokio runtime.
    pub fn append(
        &self,
        target: &str,
        timestamp: i64,
        info: Value,
    ) -> impl Future<Output = StoreResult<()>> + Send + 'static {
        let (done, rx) = oneshot::channel();
        self.shared.stats.pending.fetch_add(1, Ordering::Relaxed);
        self.enqueue(
            target,
            PendingAppend {
                visit: Visit::new(timestamp, info),
                done,
            },
        );
        async move { rx.await.unwrap_or(Err(StoreError::QueueClosed)) }
    }

    /// Current statistics.
    pub fn stats(&self) -> WriteStats {
        self.shared.stats.snapshot()
    }

    fn enqueue(&self, target: &str, pending: PendingAppend) {
        let mut writers = self.shared.state.writers.lock();

        let pending = match writers.get(target) {
            Some(sender) => match sender.send(pending) {
                Ok(()) => return,
                // The previous drain task died without retiring
                Err(mpsc::error::SendError(pending)) => {
                    warn!(target, "Replacing dead drain task");
                    pending
                }
            },
            None => pending,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        writers.insert(target.to_string(), sender);
        drop(writers);

        debug!(target, "Starting drain");
        tokio::spawn(drain(self.shared.clone(), target.to_string(), receiver, pending));
    }
}

/// Drain loop for one target: `Idle -> Draining -> Idle`.
async fn drain(
    shared: Arc<Shared>,
    target: String,
    mut receiver: mpsc::UnboundedReceiver<PendingAppend>,
    first: PendingAppend,
) {
    let mut queue: VecDeque<PendingAppend> = VecDeque::from([first]);

    loop {
        while let Ok(pending) = receiver.try_recv() {
            queue.push_back(pending);
        }

        if queue.is_empty() {
            let mut writers = shared.state.writers.lock();
            match receiver.try_recv() {
                Ok(pending) => queue.push_back(pending),
                Err(_) => {
                    writers.remove(&target);
                    debug!(target = %target, "Drain idle");
                    return;
                }
            }
        }

        let take = queue.len().min(shared.batch_cap);
        let encoded = {
            let chunk: Vec<&Visit> = queue.iter().take(take).map(|p| &p.visit).collect();
            serde_json::to_value(&chunk)
        };
        let outcome = match encoded {
            Ok(visits) => shared.commit_chunk(&target, &visits).await,
            Err(e) => Err(e.into()),
        };

        match &outcome {
            Ok(seq_id) => {
                shared.stats.batches_committed.fetch_add(1, Ordering::Relaxed);
                shared.stats.visits_committed.fetch_add(take as u64, Ordering::Relaxed);
                debug!(target = %target, seq_id, visits = take, "Committed visit batch");
            }
            Err(e) => {
                shared.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                shared.stats.visits_failed.fetch_add(take as u64, Ordering::Relaxed);
                warn!(target = %target, visits = take, error = %e, "Dropping visit batch");
            }
        }

        let result = outcome.map(|_| ());
        for pending in queue.drain(..take) {
            shared.stats.pending.fetch_sub(1, Ordering::Relaxed);
            let _ = pending.done.send(result.clone());
        }
    }
}

impl Shared {
    /// Commit one chunk, moving to the next sequence number on conflict.
    async fn commit_chunk(&self, target: &str, visits: &Value) -> StoreResult<u64> {
        let mut conflicts = 0u32;

        loop {
            let seq_id = self.allocator.next_candidate(target).await?;

            match self.try_insert(target, seq_id, visits).await {
                Ok(()) => {
                    // A batch at u64::MAX leaves the mark on it; the next
                    // write conflicts and reports exhaustion.
                    self.allocator.advance(target, seq_id.saturating_add(1));
                    return Ok(seq_id);
                }
                Err(StoreError::SequenceConflict { .. }) => {
                    let next = seq_id.checked_add(1).ok_or_else(|| StoreError::SequenceExhausted {
                        target: target.to_string(),
                    })?;
                    self.allocator.advance(target, next);
                    self.stats.sequence_conflicts.fetch_add(1, Ordering::Relaxed);
                    conflicts += 1;
                    debug!(target, seq_id, conflicts, "Sequence taken, retrying");

                    if !self.conflict.allows(conflicts) {
                        return Err(StoreError::RetriesExhausted {
                            target: target.to_string(),
                            attempts: conflicts,
                        });
                    }
                    if let Some(pause) = self.conflict.pause_after(conflicts) {
                        tokio::time::sleep(pause).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_insert(&self, target: &str, seq_id: u64, visits: &Value) -> StoreResult<()> {
        match self.backend.insert(encode_batch(target, seq_id, visits)).await {
            Err(StoreError::Conflict(_)) => Err(StoreError::SequenceConflict {
                target: target.to_string(),
                seq_id,
            }),
            other => other,
        }
    }
}
