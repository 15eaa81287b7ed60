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

//! Dequeue-ordering tests: priority precedence, FIFO among equals, and
//! delayed eligibility.

use serde_json::json;
use std::time::Duration;

use crate::fixtures::{memory_pair, LONG_LEASE};

#[tokio::test]
async fn higher_priority_dequeues_first() {
    let (_store, coordinator) = memory_pair();
    let low = coordinator
        .enqueue("work", json!({"n": 1}), 1, 3, Duration::ZERO)
        .await
        .unwrap();
    let high = coordinator
        .enqueue("work", json!({"n": 2}), 10, 3, Duration::ZERO)
        .await
        .unwrap();

    let first = coordinator.dequeue(LONG_LEASE).await.unwrap().unwrap();
    let second = coordinator.dequeue(LONG_LEASE).await.unwrap().unwrap();
    assert_eq!(first.task_id, high);
    assert_eq!(second.task_id, low);
}

#[tokio::test]
async fn never_returns_lower_priority_while_higher_is_eligible() {
    let (_store, coordinator) = memory_pair();
    for n in 0..5 {
        coordinator
            .enqueue("work", json!({"n": n}), 2, 3, Duration::ZERO)
            .await
            .unwrap();
        coordinator
            .enqueue("work", json!({"n": n}), 7, 3, Duration::ZERO)
            .await
            .unwrap();
    }

    let mut priorities = Vec::new();
    while let Some(leased) = coordinator.dequeue(LONG_LEASE).await.unwrap() {
        priorities.push(leased.priority);
    }
    assert_eq!(priorities, vec![7, 7, 7, 7, 7, 2, 2, 2, 2, 2]);
}

#[tokio::test]
async fn fifo_among_equal_priorities() {
    let (_store, coordinator) = memory_pair();
    let mut expected = Vec::new();
    for n in 0..4 {
        let id = coordinator
            .enqueue("work", json!({"n": n}), 5, 3, Duration::ZERO)
            .await
            .unwrap();
        expected.push(id);
    }

    let mut order = Vec::new();
    while let Some(leased) = coordinator.dequeue(LONG_LEASE).await.unwrap() {
        order.push(leased.task_id);
    }
    assert_eq!(order, expected);
}

#[tokio::test]
async fn delayed_task_is_held_until_eligible() {
    let (_store, coordinator) = memory_pair();
    let task_id = coordinator
        .enqueue("work", json!({}), 5, 3, Duration::from_millis(60))
        .await
        .unwrap();

    assert!(coordinator.dequeue(LONG_LEASE).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let leased = coordinator.dequeue(LONG_LEASE).await.unwrap().unwrap();
    assert_eq!(leased.task_id, task_id);
}

#[tokio::test]
async fn delayed_high_priority_does_not_shadow_eligible_work() {
    let (_store, coordinator) = memory_pair();
    coordinator
        .enqueue("work", json!({"urgent": true}), 100, 3, Duration::from_secs(60))
        .await
        .unwrap();
    let eligible = coordinator
        .enqueue("work", json!({}), 1, 3, Duration::ZERO)
        .await
        .unwrap();

    let leased = coordinator.dequeue(LONG_LEASE).await.unwrap().unwrap();
    assert_eq!(leased.task_id, eligible);
    assert!(coordinator.dequeue(LONG_LEASE).await.unwrap().is_none());
}

#[tokio::test]
async fn empty_queue_returns_none() {
    let (_store, coordinator) = memory_pair();
    assert!(coordinator.dequeue(LONG_LEASE).await.unwrap().is_none());
}

#[tokio::test]
async fn queue_depth_reflects_index_and_leases() {
    let (_store, coordinator) = memory_pair();
    coordinator
        .enqueue("work", json!({}), 5, 3, Duration::ZERO)
        .await
        .unwrap();
    coordinator
        .enqueue("work", json!({}), 5, 3, Duration::ZERO)
        .await
        .unwrap();
    coordinator
        .enqueue("work", json!({}), 2, 3, Duration::from_secs(60))
        .await
        .unwrap();
    coordinator.dequeue(LONG_LEASE).await.unwrap().unwrap();

    let depth = coordinator.queue_depth();
    assert_eq!(depth.ready, 1);
    assert_eq!(depth.delayed, 1);
    assert_eq!(depth.leased, 1);
    assert_eq!(depth.by_priority.get(&5), Some(&1));
    assert_eq!(depth.by_priority.get(&2), Some(&1));
}
