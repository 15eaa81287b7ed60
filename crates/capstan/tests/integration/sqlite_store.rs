/*
 *  Copyright 2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Durable-store behavior: compare-and-swap semantics, survival across
//! reopen, and concurrent claiming against the SQLite backend.

use serde_json::json;
use serial_test::serial;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use capstan::{
    SchedulerCoordinator, SqliteTaskStore, StoreError, TaskFilter, TaskRecord, TaskState,
    TaskStore,
};
use tokio::sync::Barrier;

use crate::fixtures::{test_config, LONG_LEASE};

async fn open_store(dir: &tempfile::TempDir) -> SqliteTaskStore {
    let path = dir.path().join("capstan.db");
    SqliteTaskStore::open(path.to_str().unwrap())
        .await
        .expect("failed to open store")
}

fn record(kind: &str, priority: i32) -> TaskRecord {
    TaskRecord::new(kind, json!({"k": kind}), priority, 3, Duration::ZERO)
}

#[tokio::test]
#[serial]
async fn update_is_compare_and_swap() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let task = record("cas", 5);
    store.put(task.clone()).await.unwrap();

    let mut winner = task.clone();
    winner.state = TaskState::Leased;
    let updated = store.update(winner).await.unwrap();
    assert_eq!(updated.version, task.version + 1);

    // A second writer holding the original version loses the race.
    let mut loser = task.clone();
    loser.state = TaskState::Dead;
    assert!(matches!(
        store.update(loser).await,
        Err(StoreError::Conflict { .. })
    ));

    let current = store.get(task.id).await.unwrap();
    assert_eq!(current.state, TaskState::Leased);
}

#[tokio::test]
#[serial]
async fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let task = record("durable", 7);
    {
        let store = open_store(&dir).await;
        store.put(task.clone()).await.unwrap();
    }

    let reopened = open_store(&dir).await;
    let fetched = reopened.get(task.id).await.unwrap();
    assert_eq!(fetched.id, task.id);
    assert_eq!(fetched.kind, "durable");
    assert_eq!(fetched.priority, 7);
    assert_eq!(fetched.state, TaskState::Ready);
    assert_eq!(fetched.payload, json!({"k": "durable"}));
}

#[tokio::test]
#[serial]
async fn scan_filters_states_and_limits() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    for _ in 0..3 {
        store.put(record("ready", 1)).await.unwrap();
    }
    let mut dead = record("dead", 1);
    dead.state = TaskState::Dead;
    store.put(dead.clone()).await.unwrap();

    let dead_letters = store
        .scan(TaskFilter::with_states(vec![TaskState::Dead]))
        .await
        .unwrap();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].id, dead.id);

    let limited = store.scan(TaskFilter::default().limit(2)).await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
#[serial]
async fn unknown_id_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let id = uuid::Uuid::new_v4();
    assert!(matches!(store.get(id).await, Err(StoreError::NotFound(e)) if e == id));
}

/// Multiple workers claiming concurrently must never produce a duplicate
/// claim, and every task must be claimed exactly once.
#[tokio::test]
#[serial]
async fn concurrent_dequeue_produces_no_duplicate_claims() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open_store(&dir).await);
    let coordinator = Arc::new(SchedulerCoordinator::new(store.clone(), test_config()));

    const NUM_TASKS: usize = 20;
    let mut enqueued = HashSet::new();
    for n in 0..NUM_TASKS {
        let id = coordinator
            .enqueue("claim", json!({"n": n}), 5, 3, Duration::ZERO)
            .await
            .unwrap();
        enqueued.insert(id);
    }

    const NUM_WORKERS: usize = 10;
    let barrier = Arc::new(Barrier::new(NUM_WORKERS));
    let mut handles = Vec::new();
    for _ in 0..NUM_WORKERS {
        let coordinator = coordinator.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut claimed = Vec::new();
            while let Some(leased) = coordinator.dequeue(LONG_LEASE).await.unwrap() {
                claimed.push(leased.task_id);
            }
            claimed
        }));
    }

    let mut all_claims = Vec::new();
    for handle in handles {
        all_claims.extend(handle.await.unwrap());
    }

    let unique: HashSet<_> = all_claims.iter().copied().collect();
    assert_eq!(all_claims.len(), NUM_TASKS, "every task claimed exactly once");
    assert_eq!(unique, enqueued);
}
