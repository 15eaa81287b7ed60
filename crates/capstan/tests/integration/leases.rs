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

//! Lease expiry, reclaim, and extension behavior.

use serde_json::json;
use std::time::Duration;

use capstan::{SchedulerError, TaskState, TaskStore};

use crate::fixtures::{memory_pair, LONG_LEASE};

#[tokio::test]
async fn expired_lease_redelivers_with_new_token() {
    let (_store, coordinator) = memory_pair();
    let task_id = coordinator
        .enqueue("work", json!({}), 5, 3, Duration::ZERO)
        .await
        .unwrap();

    let first = coordinator
        .dequeue(Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.attempt_count, 1);

    // No ack, no fail: wait out the visibility timeout.
    tokio::time::sleep(Duration::from_millis(120)).await;

    let second = coordinator.dequeue(LONG_LEASE).await.unwrap().unwrap();
    assert_eq!(second.task_id, task_id);
    assert_eq!(second.attempt_count, 2);
    assert_ne!(second.lease_id, first.lease_id);
    assert!(coordinator.metrics().leases_expired >= 1);
}

#[tokio::test]
async fn expired_lease_is_reclaimed_exactly_once() {
    let (_store, coordinator) = memory_pair();
    let task_id = coordinator
        .enqueue("work", json!({}), 5, 5, Duration::ZERO)
        .await
        .unwrap();

    coordinator
        .dequeue(Duration::from_millis(40))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(90)).await;

    // Repeated sweeps must not duplicate the index entry.
    coordinator.sweep_expired_leases().await.unwrap();
    coordinator.sweep_expired_leases().await.unwrap();

    let reclaimed = coordinator.dequeue(LONG_LEASE).await.unwrap().unwrap();
    assert_eq!(reclaimed.task_id, task_id);
    assert!(coordinator.dequeue(LONG_LEASE).await.unwrap().is_none());
}

#[tokio::test]
async fn background_sweeper_reclaims_without_dequeue_traffic() {
    let (store, coordinator) = memory_pair();
    let task_id = coordinator
        .enqueue("work", json!({}), 5, 3, Duration::ZERO)
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = coordinator.clone().spawn_lease_sweeper(shutdown_rx);

    coordinator
        .dequeue(Duration::from_millis(40))
        .await
        .unwrap()
        .unwrap();

    // The sweeper alone returns the task to ready.
    crate::fixtures::await_state(
        store.as_ref(),
        task_id,
        TaskState::Ready,
        Duration::from_secs(2),
    )
    .await;

    shutdown_tx.send(true).unwrap();
    sweeper.await.unwrap();
}

#[tokio::test]
async fn extend_lease_defers_expiry() {
    let (_store, coordinator) = memory_pair();
    let task_id = coordinator
        .enqueue("slow", json!({}), 5, 3, Duration::ZERO)
        .await
        .unwrap();

    let leased = coordinator
        .dequeue(Duration::from_millis(80))
        .await
        .unwrap()
        .unwrap();
    let extended_to = coordinator
        .extend_lease(task_id, leased.lease_id, Duration::from_millis(400))
        .await
        .unwrap();
    assert!(extended_to > leased.lease_expires_at);

    // Past the original deadline but within the extension: still leased.
    tokio::time::sleep(Duration::from_millis(150)).await;
    coordinator.sweep_expired_leases().await.unwrap();
    assert!(coordinator.dequeue(LONG_LEASE).await.unwrap().is_none());

    coordinator.ack(task_id, leased.lease_id).await.unwrap();
}

#[tokio::test]
async fn extend_with_wrong_token_is_fenced() {
    let (_store, coordinator) = memory_pair();
    let task_id = coordinator
        .enqueue("work", json!({}), 5, 3, Duration::ZERO)
        .await
        .unwrap();
    coordinator.dequeue(LONG_LEASE).await.unwrap().unwrap();

    assert!(matches!(
        coordinator
            .extend_lease(task_id, uuid::Uuid::new_v4(), Duration::from_secs(10))
            .await,
        Err(SchedulerError::Fenced { .. })
    ));
}

#[tokio::test]
async fn extend_after_expiry_reports_expired() {
    let (_store, coordinator) = memory_pair();
    let task_id = coordinator
        .enqueue("work", json!({}), 5, 3, Duration::ZERO)
        .await
        .unwrap();
    let leased = coordinator
        .dequeue(Duration::from_millis(30))
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(70)).await;
    assert!(matches!(
        coordinator
            .extend_lease(task_id, leased.lease_id, Duration::from_secs(10))
            .await,
        Err(SchedulerError::LeaseExpired { .. })
    ));
}

#[tokio::test]
async fn lease_expiry_on_final_attempt_dead_letters() {
    let (store, coordinator) = memory_pair();
    let task_id = coordinator
        .enqueue("work", json!({}), 5, 1, Duration::ZERO)
        .await
        .unwrap();

    coordinator
        .dequeue(Duration::from_millis(40))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(90)).await;
    coordinator.sweep_expired_leases().await.unwrap();

    // Re-granting would exceed the attempt cap, so the reclaim goes
    // straight to the dead-letter set.
    let record = store.get(task_id).await.unwrap();
    assert_eq!(record.state, TaskState::Dead);
    assert_eq!(record.attempt_count, 1);
    assert!(coordinator.dequeue(LONG_LEASE).await.unwrap().is_none());

    let dead = coordinator.peek_dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, task_id);
}
