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

//! Restart recovery: the index and lease table are rebuilt entirely from a
//! store scan, and pre-crash leases keep their stored deadlines.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use capstan::SchedulerCoordinator;

use crate::fixtures::{memory_pair, test_config, LONG_LEASE};

#[tokio::test]
async fn recover_rebuilds_index_and_leases_from_store() {
    let (store, first_coordinator) = memory_pair();

    let ready = first_coordinator
        .enqueue("work", json!({"n": 1}), 5, 3, Duration::ZERO)
        .await
        .unwrap();
    let delayed = first_coordinator
        .enqueue("work", json!({"n": 2}), 5, 3, Duration::from_secs(60))
        .await
        .unwrap();
    let claimed = first_coordinator
        .enqueue("work", json!({"n": 3}), 9, 3, Duration::ZERO)
        .await
        .unwrap();
    let leased = first_coordinator.dequeue(LONG_LEASE).await.unwrap().unwrap();
    assert_eq!(leased.task_id, claimed);

    // Simulated crash: a fresh coordinator over the same store.
    drop(first_coordinator);
    let second = Arc::new(SchedulerCoordinator::new(store.clone(), test_config()));
    let report = second.recover().await.unwrap();
    assert_eq!(report.runnable_indexed, 2);
    assert_eq!(report.leases_restored, 1);

    let depth = second.queue_depth();
    assert_eq!(depth.ready, 1);
    assert_eq!(depth.delayed, 1);
    assert_eq!(depth.leased, 1);

    // The leased task is still owned by its pre-crash lease; only the
    // ready task is dequeuable.
    let next = second.dequeue(LONG_LEASE).await.unwrap().unwrap();
    assert_eq!(next.task_id, ready);
    assert!(second.dequeue(LONG_LEASE).await.unwrap().is_none());
    let _ = delayed;
}

#[tokio::test]
async fn recovery_honors_pre_crash_lease_deadline() {
    let (store, first_coordinator) = memory_pair();
    let task_id = first_coordinator
        .enqueue("work", json!({}), 5, 3, Duration::ZERO)
        .await
        .unwrap();
    let leased = first_coordinator
        .dequeue(Duration::from_millis(80))
        .await
        .unwrap()
        .unwrap();

    drop(first_coordinator);
    let second = Arc::new(SchedulerCoordinator::new(store.clone(), test_config()));
    second.recover().await.unwrap();

    // Before the stored deadline: the lease is honored, not reset.
    assert!(second.dequeue(LONG_LEASE).await.unwrap().is_none());

    // After it: the task is redelivered with a fresh lease.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let redelivered = second.dequeue(LONG_LEASE).await.unwrap().unwrap();
    assert_eq!(redelivered.task_id, task_id);
    assert_eq!(redelivered.attempt_count, 2);
    assert_ne!(redelivered.lease_id, leased.lease_id);
}

#[tokio::test]
async fn terminal_tasks_are_not_reindexed() {
    let (store, first_coordinator) = memory_pair();
    let done = first_coordinator
        .enqueue("work", json!({}), 5, 3, Duration::ZERO)
        .await
        .unwrap();
    let leased = first_coordinator.dequeue(LONG_LEASE).await.unwrap().unwrap();
    first_coordinator.ack(done, leased.lease_id).await.unwrap();

    let second = Arc::new(SchedulerCoordinator::new(store.clone(), test_config()));
    let report = second.recover().await.unwrap();
    assert_eq!(report.runnable_indexed, 0);
    assert_eq!(report.leases_restored, 0);
    assert!(second.dequeue(LONG_LEASE).await.unwrap().is_none());
}
