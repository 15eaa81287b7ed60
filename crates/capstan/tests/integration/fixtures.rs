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

//! Shared helpers for the integration tests.
//!
//! Tests run against real wall-clock time, so the fixtures use short
//! backoff and sweep intervals to keep them fast while leaving enough
//! margin to stay deterministic under load.

use std::sync::Arc;
use std::time::Duration;

use capstan::{
    BackoffStrategy, MemoryTaskStore, RetryPolicy, SchedulerConfig, SchedulerCoordinator,
    TaskRecord, TaskState, TaskStore,
};
use uuid::Uuid;

/// Fast, deterministic policy: 40ms, 80ms, 160ms, capped at 200ms, no jitter.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(200),
        backoff_strategy: BackoffStrategy::Exponential {
            base: 2.0,
            multiplier: 1.0,
        },
        jitter: false,
    }
}

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        max_conflict_retries: 5,
        sweep_interval: Duration::from_millis(25),
        retry_policy: fast_policy(),
    }
}

/// Coordinator over a fresh in-memory store, returned alongside the store
/// so tests can inspect raw records.
pub fn memory_pair() -> (Arc<MemoryTaskStore>, Arc<SchedulerCoordinator>) {
    let store = Arc::new(MemoryTaskStore::new());
    let coordinator = Arc::new(SchedulerCoordinator::new(store.clone(), test_config()));
    (store, coordinator)
}

/// A lease long enough to never expire within a test unless that is the
/// point of the test.
pub const LONG_LEASE: Duration = Duration::from_secs(30);

/// Polls the store until the task reaches `state`, panicking on timeout.
pub async fn await_state<S>(
    store: &S,
    task_id: Uuid,
    state: TaskState,
    timeout: Duration,
) -> TaskRecord
where
    S: TaskStore + ?Sized,
{
    let start = std::time::Instant::now();
    loop {
        let record = store.get(task_id).await.expect("task should exist");
        if record.state == state {
            return record;
        }
        if start.elapsed() > timeout {
            panic!(
                "task {} did not reach {:?} within {:?} (currently {:?}, attempt {})",
                task_id, state, timeout, record.state, record.attempt_count
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
