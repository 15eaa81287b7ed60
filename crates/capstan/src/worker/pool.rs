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

//! Worker Pool
//!
//! A bounded set of concurrent executors looping dequeue → handler →
//! ack/fail, touching scheduler state only through the coordinator
//! contract. A semaphore caps concurrent executions; each claimed task runs
//! in its own spawned task holding an owned permit for its duration.
//!
//! Failure transparency: a handler that times out or panics gets no
//! explicit `fail` call — its lease is left to expire so the sweep reclaims
//! it, making a hung handler and a worker that died mid-task
//! indistinguishable, as at-least-once semantics require.

use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::registry::{HandlerRegistry, TaskHandler};
use crate::config::WorkerPoolConfig;
use crate::coordinator::{LeasedTask, SchedulerCoordinator};
use crate::error::WorkerError;
use crate::models::task::FailureKind;

/// Bounded pool of concurrent task executors.
pub struct WorkerPool {
    coordinator: Arc<SchedulerCoordinator>,
    registry: Arc<HandlerRegistry>,
    config: WorkerPoolConfig,
    /// Unique identifier for this pool instance, for tracking and logging.
    instance_id: Uuid,
}

impl WorkerPool {
    pub fn new(
        coordinator: Arc<SchedulerCoordinator>,
        registry: Arc<HandlerRegistry>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            coordinator,
            registry,
            config,
            instance_id: Uuid::new_v4(),
        }
    }

    /// Runs the polling loop until the shutdown channel flips to `true` (or
    /// its sender is dropped), then drains in-flight tasks.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!("Starting worker pool (instance: {})", self.instance_id);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_tasks()));
        let mut interval = time::interval(self.config.poll_interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            // Only poll if a concurrency slot is free.
            if semaphore.available_permits() == 0 {
                debug!("All execution slots busy, skipping poll");
                continue;
            }

            match self.coordinator.dequeue(self.config.lease_duration()).await {
                Ok(Some(leased)) => {
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|_| WorkerError::ShuttingDown)?;
                    let coordinator = self.coordinator.clone();
                    let handler = self.registry.get(&leased.kind);
                    let handler_timeout = self.config.handler_timeout();

                    tokio::spawn(async move {
                        let _permit = permit; // Hold slot until the attempt resolves
                        execute_leased(coordinator, handler, leased, handler_timeout).await;
                    });
                }
                Ok(None) => {
                    debug!("No eligible tasks found");
                }
                Err(e) => {
                    error!("Failed to dequeue task: {}", e);
                }
            }
        }

        info!("Worker pool draining (instance: {})", self.instance_id);
        let _ = semaphore
            .acquire_many(self.config.max_concurrent_tasks() as u32)
            .await;
        info!("Worker pool stopped (instance: {})", self.instance_id);
        Ok(())
    }
}

/// Runs one claimed attempt and reports its outcome to the coordinator.
///
/// Timeouts deliberately report nothing: the lease expires and the sweep
/// reclaims the task. A panic in the handler unwinds this spawned task
/// before any ack/fail call, landing on the same path.
async fn execute_leased(
    coordinator: Arc<SchedulerCoordinator>,
    handler: Option<Arc<dyn TaskHandler>>,
    leased: LeasedTask,
    handler_timeout: std::time::Duration,
) {
    let task_id = leased.task_id;
    let lease_id = leased.lease_id;

    let Some(handler) = handler else {
        warn!(
            task_id = %task_id,
            kind = %leased.kind,
            "No handler registered for task kind, dead-lettering"
        );
        if let Err(e) = coordinator.fail(task_id, lease_id, FailureKind::Poison).await {
            warn!(task_id = %task_id, error = %e, "Failed to report missing handler");
        }
        return;
    };

    info!(
        task_id = %task_id,
        kind = %leased.kind,
        attempt = leased.attempt_count,
        "Executing task"
    );

    match time::timeout(
        handler_timeout,
        handler.execute(leased.payload, leased.attempt_count),
    )
    .await
    {
        Ok(Ok(())) => {
            if let Err(e) = coordinator.ack(task_id, lease_id).await {
                warn!(task_id = %task_id, error = %e, "Failed to ack completed task");
            }
        }
        Ok(Err(handler_error)) => {
            let failure_kind = handler_error.failure_kind();
            warn!(
                task_id = %task_id,
                attempt = leased.attempt_count,
                error = %handler_error,
                "Task attempt failed"
            );
            if let Err(e) = coordinator.fail(task_id, lease_id, failure_kind).await {
                warn!(task_id = %task_id, error = %e, "Failed to report task failure");
            }
        }
        Err(_) => {
            warn!(
                task_id = %task_id,
                attempt = leased.attempt_count,
                "Handler timed out, leaving lease to expire"
            );
        }
    }
}
