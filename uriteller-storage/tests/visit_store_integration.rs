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

//! Integration tests for the visit store across simulated processes

use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uriteller_core::{ConflictPolicy, EntityKind, StoreConfig, Visit};
use uriteller_storage::codec::decode_batch;
use uriteller_storage::{MemoryStore, VisitStore};

fn process(backend: &Arc<MemoryStore>, batch_cap: usize) -> VisitStore {
    VisitStore::new(
        backend.clone(),
        StoreConfig::default().with_batch_cap(batch_cap),
    )
}

/// Committed batches for `target` as `(seq_id, visits)`, ascending.
fn committed(backend: &MemoryStore, target: &str) -> Vec<(u64, Vec<Visit>)> {
    let mut batches: Vec<(u64, Vec<Visit>)> = backend
        .entities()
        .into_iter()
        .filter(|e| e.key.kind == EntityKind::Visit)
        .filter_map(|e| decode_batch(e).ok())
        .filter(|b| b.target == target)
        .map(|b| (b.seq_id, b.visits))
        .collect();
    batches.sort_by_key(|(seq, _)| *seq);
    batches
}

fn tag(visit: &Visit) -> (u64, u64) {
    (
        visit.info["p"].as_u64().unwrap_or(u64::MAX),
        visit.info["i"].as_u64().unwrap_or(u64::MAX),
    )
}

/// 25 appends issued before any is awaited land in batches of 10, 10, 5
#[tokio::test]
async fn test_burst_is_split_into_capped_batches() {
    let backend = Arc::new(MemoryStore::new());
    let store = process(&backend, 10);

    let pending: Vec<_> = (0..25)
        .map(|i| store.append("T", i, json!({"i": i})))
        .collect();
    for result in futures::future::join_all(pending).await {
        result.unwrap();
    }

    let batches = committed(&backend, "T");
    let sizes: Vec<(u64, usize)> = batches.iter().map(|(s, v)| (*s, v.len())).collect();
    assert_eq!(sizes, vec![(0, 10), (1, 10), (2, 5)]);

    let page = store.list("T", 0).await.unwrap();
    assert_eq!(page.cursor, 3);
    assert_eq!(page.visits.len(), 25);
    // Newest batch first, arrival order inside each batch
    assert_eq!(page.visits[0].timestamp, 20);
    assert_eq!(page.visits[24].timestamp, 9);
}

/// Two processes both start at candidate 0; the loser moves to 1
#[tokio::test]
async fn test_two_processes_contend_for_one_sequence() {
    let backend = Arc::new(MemoryStore::new());
    let a = process(&backend, 10);
    let b = process(&backend, 10);

    assert_eq!(a.allocator().next_candidate("T").await.unwrap(), 0);
    assert_eq!(b.allocator().next_candidate("T").await.unwrap(), 0);

    a.append("T", 1, json!({"from": "a"})).await.unwrap();
    b.append("T", 2, json!({"from": "b"})).await.unwrap();

    assert_eq!(a.write_stats().sequence_conflicts, 0);
    assert_eq!(b.write_stats().sequence_conflicts, 1);
    assert_eq!(b.allocator().cached("T"), Some(2));

    let page = a.list("T", 0).await.unwrap();
    assert_eq!(page.cursor, 2);
    let timestamps: Vec<i64> = page.visits.iter().map(|v| v.timestamp).collect();
    assert_eq!(timestamps, vec![2, 1]);
}

/// A batch missed by the query is still returned once a later batch is seen
#[tokio::test]
async fn test_cursor_read_backfills_lagging_batch() {
    let backend = Arc::new(MemoryStore::new());
    let store = process(&backend, 10);

    for i in 0..5 {
        store.append("T", i, json!({})).await.unwrap();
    }

    // Sequence 5 is not committed yet
    let page = store.list("T", 5).await.unwrap();
    assert_eq!(page.cursor, 5);
    assert!(page.visits.is_empty());

    // Sequence 5 commits but stays invisible to queries; 6 is visible
    backend.set_query_lag(true);
    store.append("T", 5, json!({})).await.unwrap();
    backend.set_query_lag(false);
    store.append("T", 6, json!({})).await.unwrap();

    let page = store.list("T", 5).await.unwrap();
    assert_eq!(page.cursor, 7);
    let timestamps: Vec<i64> = page.visits.iter().map(|v| v.timestamp).collect();
    assert_eq!(timestamps, vec![6, 5]);
}

#[tokio::test]
async fn test_list_is_idempotent() {
    let backend = Arc::new(MemoryStore::new());
    let store = process(&backend, 3);

    let pending: Vec<_> = (0..7).map(|i| store.append("T", i, json!({}))).collect();
    futures::future::join_all(pending).await;

    let first = store.list("T", 1).await.unwrap();
    let second = store.list("T", 1).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.cursor, 3);
}

#[tokio::test]
async fn test_concurrent_creates_across_processes() {
    let backend = Arc::new(MemoryStore::new());
    let stores: Vec<VisitStore> = (0..3).map(|_| process(&backend, 10)).collect();

    let creates = stores
        .iter()
        .flat_map(|s| (0..10).map(move |_| s.create_pair()));
    let pairs = futures::future::try_join_all(creates).await.unwrap();

    let mut ids = HashSet::new();
    for (trap, view) in &pairs {
        assert!(ids.insert(trap.id.clone()));
        assert!(ids.insert(view.id.clone()));
        let stored = stores[0].get(&view.other).await.unwrap().unwrap();
        assert_eq!(&stored, trap);
    }
    assert_eq!(backend.len(), 60);
}

#[tokio::test]
async fn test_conflict_budget_fails_chunk() {
    let backend = Arc::new(MemoryStore::new());
    let seeding = process(&backend, 10);
    for i in 0..3 {
        seeding.append("T", i, json!({})).await.unwrap();
    }

    let config = StoreConfig::default().with_conflict_policy(ConflictPolicy::bounded(1));
    let stale = VisitStore::new(backend.clone(), config);
    stale.allocator().advance("T", 0);

    let err = stale.append("T", 9, json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        uriteller_core::StoreError::RetriesExhausted { attempts: 2, .. }
    ));

    // Budget resets per chunk and the cache kept ratcheting
    stale.append("T", 10, json!({})).await.unwrap();
    assert_eq!(committed(&backend, "T").last().map(|(s, _)| *s), Some(3));
}

/// Many processes, many targets, real threads: every visit lands exactly
/// once, sequence numbers stay contiguous and each process keeps its order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_processes_no_loss_no_duplicates() {
    let backend = Arc::new(MemoryStore::new());
    let stores: Vec<VisitStore> = (0..4).map(|_| process(&backend, 4)).collect();
    let targets = ["A", "B"];

    let mut tasks = Vec::new();
    for (p, store) in stores.iter().enumerate() {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let pending: Vec<_> = (0..30u64)
                .map(|i| {
                    let target = targets[(i % 2) as usize];
                    store.append(target, i as i64, json!({"p": p, "i": i}))
                })
                .collect();
            futures::future::join_all(pending).await
        }));
    }
    for task in tasks {
        for result in task.await.unwrap() {
            result.unwrap();
        }
    }

    for target in targets {
        let batches = committed(&backend, target);
        let seqs: Vec<u64> = batches.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, (0..batches.len() as u64).collect::<Vec<_>>());

        let mut seen = HashSet::new();
        let mut last_index: HashMap<u64, u64> = HashMap::new();
        for visit in batches.iter().flat_map(|(_, v)| v) {
            let (p, i) = tag(visit);
            assert!(seen.insert((p, i)), "duplicate visit {p}/{i}");
            if let Some(prev) = last_index.insert(p, i) {
                assert!(prev < i, "process {p} reordered {prev} and {i}");
            }
        }
        assert_eq!(seen.len(), 4 * 15);
    }
}

/// Readers advancing their cursor while writers run see each visit once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_polling_reader_sees_each_visit_once() {
    let backend = Arc::new(MemoryStore::new());
    let writers: Vec<VisitStore> = (0..3).map(|_| process(&backend, 3)).collect();
    let reader = process(&backend, 3);

    let mut tasks = Vec::new();
    for (p, store) in writers.iter().enumerate() {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..20u64 {
                store.append("T", i as i64, json!({"p": p, "i": i})).await?;
            }
            Ok::<_, uriteller_core::StoreError>(())
        }));
    }

    let mut cursor = 0;
    let mut seen = Vec::new();
    loop {
        let done = tasks.iter().all(|t| t.is_finished());
        let page = reader.list("T", cursor).await.unwrap();
        assert!(page.cursor >= cursor);
        cursor = page.cursor;
        seen.extend(page.visits.iter().map(tag));
        if done {
            break;
        }
        tokio::task::yield_now().await;
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len());
    assert_eq!(unique.len(), 60);
}
