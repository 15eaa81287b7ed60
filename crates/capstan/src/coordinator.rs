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

//! Scheduler Coordinator
//!
//! The façade producers and workers use. It orchestrates the task store,
//! priority index, and lease manager behind a single contract:
//! `enqueue` / `dequeue` / `ack` / `fail` / `extend_lease`, plus recovery,
//! the lease-expiry sweep, dead-letter inspection, and the administrative
//! cancel path.
//!
//! Mutating operations are serializable per task through the store's
//! version compare-and-swap; version-conflict races are retried internally
//! a bounded number of times before surfacing as unavailable. The index
//! mutex is the only critical section shared by all workers and is never
//! held across an await.
//!
//! `dequeue` is a non-blocking poll: it returns `Ok(None)` when no eligible
//! task exists. Callers that want to block can await [`wait_for_work`]
//! between polls; the coordinator signals it on enqueue and on lease
//! reclaim.
//!
//! [`wait_for_work`]: SchedulerCoordinator::wait_for_work

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, StoreError};
use crate::index::PriorityIndex;
use crate::lease::{LeaseFault, LeaseManager};
use crate::models::task::{deadline_after, FailureKind, TaskRecord, TaskState};
use crate::retry::RetryDecision;
use crate::stats::{MetricsSnapshot, QueueDepth, SchedulerMetrics};
use crate::store::{TaskFilter, TaskStore};

/// A task handed to a worker together with its lease token.
#[derive(Debug, Clone)]
pub struct LeasedTask {
    pub task_id: Uuid,
    pub lease_id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub attempt_count: i32,
    pub lease_expires_at: DateTime<Utc>,
}

/// Counts from a startup recovery scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Runnable tasks re-inserted into the priority index.
    pub runnable_indexed: usize,
    /// In-flight leases re-registered with their stored deadlines.
    pub leases_restored: usize,
    /// Leased records missing lease fields, repaired back to ready.
    pub repaired: usize,
}

/// Coordinates the task store, priority index, and lease manager.
pub struct SchedulerCoordinator {
    store: Arc<dyn TaskStore>,
    index: Mutex<PriorityIndex>,
    leases: Mutex<LeaseManager>,
    metrics: SchedulerMetrics,
    config: SchedulerConfig,
    work_available: Notify,
}

impl SchedulerCoordinator {
    pub fn new(store: Arc<dyn TaskStore>, config: SchedulerConfig) -> Self {
        Self {
            store,
            index: Mutex::new(PriorityIndex::new()),
            leases: Mutex::new(LeaseManager::new()),
            metrics: SchedulerMetrics::default(),
            config,
            work_available: Notify::new(),
        }
    }

    fn lock_index(&self) -> MutexGuard<'_, PriorityIndex> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_leases(&self) -> MutexGuard<'_, LeaseManager> {
        self.leases.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Submits a task. Returns its id.
    ///
    /// `priority`: higher values dequeue first. `max_attempts` is clamped to
    /// at least 1. `delay` holds the task out of dequeue candidacy until it
    /// elapses.
    pub async fn enqueue(
        &self,
        kind: &str,
        payload: serde_json::Value,
        priority: i32,
        max_attempts: i32,
        delay: Duration,
    ) -> Result<Uuid, SchedulerError> {
        let record = TaskRecord::new(kind, payload, priority, max_attempts, delay);
        let task_id = record.id;
        let eligible_at = record.eligible_at;
        self.store.put(record).await?;

        self.lock_index()
            .insert(task_id, priority, eligible_at, Utc::now());
        self.metrics.record_enqueued();
        self.work_available.notify_one();
        debug!(task_id = %task_id, kind, priority, "Task enqueued");
        Ok(task_id)
    }

    /// Pops the highest-priority eligible task and grants a lease over it.
    ///
    /// Returns `Ok(None)` when no eligible task exists. The pop, lease
    /// grant, and attempt increment land in the store as one logical
    /// operation: if persistence fails, the popped entry is returned to the
    /// index before the error surfaces.
    pub async fn dequeue(
        &self,
        lease_duration: Duration,
    ) -> Result<Option<LeasedTask>, SchedulerError> {
        // Reclaim anything whose lease lapsed before handing out new work,
        // so expiry is honored even without a background sweeper running.
        if let Err(e) = self.sweep_expired_leases().await {
            debug!(error = %e, "Inline lease sweep failed");
        }

        loop {
            let now = Utc::now();
            let Some(entry) = self.lock_index().pop_highest(now) else {
                return Ok(None);
            };
            match self.try_lease(entry.task_id, lease_duration).await {
                Ok(Some(leased)) => return Ok(Some(leased)),
                Ok(None) => continue,
                Err(err) => {
                    self.lock_index().insert(
                        entry.task_id,
                        entry.priority,
                        entry.eligible_at,
                        Utc::now(),
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Attempts to lease a popped task. `Ok(None)` means the index entry was
    /// stale (task gone, no longer runnable, or not yet eligible) and the
    /// caller should move on to the next candidate.
    async fn try_lease(
        &self,
        task_id: Uuid,
        lease_duration: Duration,
    ) -> Result<Option<LeasedTask>, SchedulerError> {
        let mut conflicts = 0;
        loop {
            let record = match self.store.get(task_id).await {
                Ok(record) => record,
                Err(StoreError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            if !record.state.is_runnable() {
                return Ok(None);
            }
            let now = Utc::now();
            if record.eligible_at > now {
                // The store pushed eligibility out since this entry was
                // indexed; requeue it as delayed.
                self.lock_index()
                    .insert(task_id, record.priority, record.eligible_at, now);
                return Ok(None);
            }
            if record.attempt_count >= record.max_attempts {
                // Attempts were used up by expired leases; granting another
                // would break the attempt cap.
                let mut dead = record;
                dead.state = TaskState::Dead;
                dead.clear_lease();
                dead.last_error
                    .get_or_insert_with(|| "attempts exhausted".to_string());
                match self.store.update(dead).await {
                    Ok(_) => {
                        self.metrics.record_dead_lettered();
                        error!(task_id = %task_id, "Attempts exhausted, task dead-lettered");
                        return Ok(None);
                    }
                    Err(StoreError::Conflict { .. }) => {
                        conflicts += 1;
                        if conflicts > self.config.max_conflict_retries {
                            return Err(conflicts_exhausted(task_id));
                        }
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let lease_id = Uuid::new_v4();
            let expires_at = deadline_after(now, lease_duration);
            let mut leased = record;
            leased.state = TaskState::Leased;
            leased.attempt_count += 1;
            leased.lease_id = Some(lease_id);
            leased.lease_expires_at = Some(expires_at);

            match self.store.update(leased).await {
                Ok(updated) => {
                    self.lock_leases().register(task_id, lease_id, expires_at);
                    self.metrics.record_dequeued();
                    info!(
                        task_id = %task_id,
                        kind = %updated.kind,
                        attempt = updated.attempt_count,
                        "Task state change: Ready -> Leased"
                    );
                    return Ok(Some(LeasedTask {
                        task_id,
                        lease_id,
                        kind: updated.kind,
                        payload: updated.payload,
                        priority: updated.priority,
                        attempt_count: updated.attempt_count,
                        lease_expires_at: expires_at,
                    }));
                }
                Err(StoreError::Conflict { .. }) => {
                    conflicts += 1;
                    if conflicts > self.config.max_conflict_retries {
                        return Err(conflicts_exhausted(task_id));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Marks a leased task as succeeded.
    ///
    /// Idempotent: acking a task that already succeeded returns `Ok(())`
    /// even with a stale token, since duplicate acks are expected under
    /// at-least-once delivery. Any other mismatch between the supplied token
    /// and the active lease is fenced and mutates nothing.
    pub async fn ack(&self, task_id: Uuid, lease_id: Uuid) -> Result<(), SchedulerError> {
        let result = self
            .commit(task_id, |record| {
                if record.state == TaskState::Succeeded {
                    return Ok(None);
                }
                if !record.holds_lease(lease_id) {
                    return Err(SchedulerError::Fenced { task_id, lease_id });
                }
                let mut done = record;
                done.state = TaskState::Succeeded;
                done.clear_lease();
                Ok(Some(done))
            })
            .await;

        match result {
            Ok(Some(_)) => {
                let _ = self.lock_leases().release(task_id, lease_id);
                self.metrics.record_succeeded();
                info!(task_id = %task_id, "Task state change: Leased -> Succeeded");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => Err(self.note_fenced(err)),
        }
    }

    /// Reports a failed attempt for a leased task.
    ///
    /// Consults the retry policy: the task either becomes runnable again
    /// after a backoff delay or transitions to the dead-letter set.
    pub async fn fail(
        &self,
        task_id: Uuid,
        lease_id: Uuid,
        failure_kind: FailureKind,
    ) -> Result<(), SchedulerError> {
        let policy = self.config.retry_policy.clone();
        let result = self
            .commit(task_id, |record| {
                if !record.holds_lease(lease_id) {
                    return Err(SchedulerError::Fenced { task_id, lease_id });
                }
                let mut failed = record;
                failed.clear_lease();
                failed.last_error = Some(format!(
                    "attempt {} failed ({})",
                    failed.attempt_count, failure_kind
                ));
                match policy.decide(failed.attempt_count, failed.max_attempts, failure_kind) {
                    RetryDecision::Retry { delay } => {
                        failed.state = TaskState::FailedRetryable;
                        failed.eligible_at = deadline_after(Utc::now(), delay);
                    }
                    RetryDecision::Dead => {
                        failed.state = TaskState::Dead;
                    }
                }
                Ok(Some(failed))
            })
            .await;

        match result {
            Ok(Some(updated)) => {
                let _ = self.lock_leases().release(task_id, lease_id);
                match updated.state {
                    TaskState::FailedRetryable => {
                        self.lock_index().insert(
                            task_id,
                            updated.priority,
                            updated.eligible_at,
                            Utc::now(),
                        );
                        self.metrics.record_retried();
                        warn!(
                            task_id = %task_id,
                            attempt = updated.attempt_count,
                            eligible_at = %updated.eligible_at,
                            "Task failed, scheduled for retry"
                        );
                    }
                    TaskState::Dead => {
                        self.metrics.record_dead_lettered();
                        error!(
                            task_id = %task_id,
                            attempt = updated.attempt_count,
                            "Task failed permanently, dead-lettered"
                        );
                    }
                    _ => {}
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => Err(self.note_fenced(err)),
        }
    }

    /// Pushes a lease deadline out by `extra`, for long-running handlers.
    pub async fn extend_lease(
        &self,
        task_id: Uuid,
        lease_id: Uuid,
        extra: Duration,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        let now = Utc::now();
        match self.lock_leases().check(task_id, lease_id, now) {
            Err(LeaseFault::Expired) => {
                return Err(SchedulerError::LeaseExpired { task_id, lease_id })
            }
            Err(LeaseFault::Fenced) => {
                self.metrics.record_fenced();
                return Err(SchedulerError::Fenced { task_id, lease_id });
            }
            Ok(()) => {}
        }

        let updated = self
            .commit(task_id, |record| {
                if !record.holds_lease(lease_id) {
                    return Err(SchedulerError::Fenced { task_id, lease_id });
                }
                let mut extended = record;
                let base = extended.lease_expires_at.unwrap_or(now);
                extended.lease_expires_at = Some(deadline_after(base, extra));
                Ok(Some(extended))
            })
            .await
            .map_err(|err| self.note_fenced(err))?;

        let deadline = updated
            .and_then(|record| record.lease_expires_at)
            .ok_or_else(|| SchedulerError::Unavailable("lease extension was lost".to_string()))?;
        self.lock_leases().register(task_id, lease_id, deadline);
        debug!(task_id = %task_id, deadline = %deadline, "Lease extended");
        Ok(deadline)
    }

    /// Administrative cancel: dead-letters a task that has not started
    /// running. Cancelling a leased or terminal task is rejected.
    pub async fn cancel(&self, task_id: Uuid) -> Result<(), SchedulerError> {
        let updated = self
            .commit(task_id, |record| {
                if !record.state.is_runnable() {
                    return Err(SchedulerError::InvalidState {
                        task_id,
                        state: record.state,
                    });
                }
                let mut cancelled = record;
                cancelled.state = TaskState::Dead;
                cancelled.last_error = Some("cancelled by operator".to_string());
                Ok(Some(cancelled))
            })
            .await?;

        if updated.is_some() {
            self.lock_index().remove(task_id);
            self.metrics.record_dead_lettered();
            info!(task_id = %task_id, "Task cancelled, moved to dead letters");
        }
        Ok(())
    }

    /// Read-only listing of dead-lettered tasks for operator inspection.
    pub async fn peek_dead_letters(&self, limit: usize) -> Result<Vec<TaskRecord>, SchedulerError> {
        let filter = TaskFilter::with_states(vec![TaskState::Dead]).limit(limit);
        Ok(self.store.scan(filter).await?)
    }

    /// Point-in-time queue depth for monitoring.
    pub fn queue_depth(&self) -> QueueDepth {
        let mut index = self.lock_index();
        index.promote_due(Utc::now());
        let leases = self.lock_leases();
        QueueDepth {
            ready: index.ready_len(),
            delayed: index.delayed_len(),
            leased: leases.active_count(),
            by_priority: index.depth_by_priority(),
        }
    }

    /// Lifecycle counters for monitoring.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Waits until new work may be available (enqueue or lease reclaim).
    pub async fn wait_for_work(&self) {
        self.work_available.notified().await;
    }

    /// Rebuilds the priority index and active-lease set from a store scan.
    ///
    /// Stored lease deadlines are honored rather than reset, so leases
    /// granted before a crash expire naturally instead of being duplicated.
    pub async fn recover(&self) -> Result<RecoveryReport, SchedulerError> {
        let filter = TaskFilter::with_states(vec![
            TaskState::Ready,
            TaskState::FailedRetryable,
            TaskState::Leased,
        ]);
        let records = self.store.scan(filter).await?;
        let now = Utc::now();
        let mut report = RecoveryReport::default();
        let mut orphaned: Vec<Uuid> = Vec::new();

        {
            let mut index = self.lock_index();
            let mut leases = self.lock_leases();
            for record in &records {
                match record.state {
                    TaskState::Ready | TaskState::FailedRetryable => {
                        index.insert(record.id, record.priority, record.eligible_at, now);
                        report.runnable_indexed += 1;
                    }
                    TaskState::Leased => match (record.lease_id, record.lease_expires_at) {
                        (Some(lease_id), Some(expires_at)) => {
                            leases.register(record.id, lease_id, expires_at);
                            report.leases_restored += 1;
                        }
                        _ => orphaned.push(record.id),
                    },
                    _ => {}
                }
            }
        }

        for task_id in orphaned {
            warn!(task_id = %task_id, "Leased record missing lease fields, repairing to ready");
            let repaired = self
                .commit(task_id, |record| {
                    if record.state != TaskState::Leased {
                        return Ok(None);
                    }
                    let mut fixed = record;
                    fixed.state = TaskState::Ready;
                    fixed.clear_lease();
                    Ok(Some(fixed))
                })
                .await?;
            if let Some(record) = repaired {
                self.lock_index()
                    .insert(record.id, record.priority, record.eligible_at, now);
                report.repaired += 1;
            }
        }

        info!(
            runnable = report.runnable_indexed,
            leases = report.leases_restored,
            repaired = report.repaired,
            "Recovery scan complete"
        );
        Ok(report)
    }

    /// Returns expired leases to the ready set (or dead-letters tasks whose
    /// attempts are exhausted). Each reclaimed task re-enters the index
    /// exactly once; the attempt was already counted at grant time.
    pub async fn sweep_expired_leases(&self) -> Result<usize, SchedulerError> {
        let now = Utc::now();
        let expired = self.lock_leases().expired(now);
        let mut reclaimed = 0;

        for (task_id, lease_id) in expired {
            match self.reclaim_expired(task_id, lease_id, now).await {
                Ok(changed) => {
                    self.lock_leases().remove(task_id);
                    if changed {
                        reclaimed += 1;
                    }
                }
                Err(e) => {
                    // Keep the entry so the next sweep retries the reclaim.
                    warn!(task_id = %task_id, error = %e, "Failed to reclaim expired lease");
                }
            }
        }
        Ok(reclaimed)
    }

    async fn reclaim_expired(
        &self,
        task_id: Uuid,
        lease_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, SchedulerError> {
        let outcome = self
            .commit(task_id, |record| {
                if !record.holds_lease(lease_id) {
                    return Ok(None);
                }
                let mut reclaimed = record;
                reclaimed.clear_lease();
                if reclaimed.attempt_count >= reclaimed.max_attempts {
                    reclaimed.state = TaskState::Dead;
                    reclaimed.last_error = Some(format!(
                        "lease expired on final attempt {}",
                        reclaimed.attempt_count
                    ));
                } else {
                    reclaimed.state = TaskState::Ready;
                    reclaimed.eligible_at = now;
                }
                Ok(Some(reclaimed))
            })
            .await;

        match outcome {
            Ok(Some(updated)) if updated.state == TaskState::Ready => {
                self.lock_index()
                    .insert(task_id, updated.priority, updated.eligible_at, now);
                self.metrics.record_lease_expired();
                warn!(
                    task_id = %task_id,
                    attempt = updated.attempt_count,
                    "Lease expired, task returned to ready"
                );
                self.work_available.notify_one();
                Ok(true)
            }
            Ok(Some(updated)) => {
                self.metrics.record_lease_expired();
                self.metrics.record_dead_lettered();
                error!(
                    task_id = %task_id,
                    attempt = updated.attempt_count,
                    "Lease expired on final attempt, task dead-lettered"
                );
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(SchedulerError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Spawns the background lease sweeper. It runs until the shutdown
    /// channel flips to `true` or its sender is dropped.
    pub fn spawn_lease_sweeper(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let coordinator = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(coordinator.config.sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = coordinator.sweep_expired_leases().await {
                            warn!(error = %e, "Lease sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Lease sweeper stopped");
        })
    }

    /// Read-modify-write with bounded retries on version conflicts.
    ///
    /// `mutate` receives the freshly read record and returns the record to
    /// write, `None` to stop without writing, or an error to surface as-is.
    async fn commit<F>(
        &self,
        task_id: Uuid,
        mut mutate: F,
    ) -> Result<Option<TaskRecord>, SchedulerError>
    where
        F: FnMut(TaskRecord) -> Result<Option<TaskRecord>, SchedulerError>,
    {
        let mut conflicts = 0;
        loop {
            let record = self.store.get(task_id).await?;
            let Some(updated) = mutate(record)? else {
                return Ok(None);
            };
            match self.store.update(updated).await {
                Ok(written) => return Ok(Some(written)),
                Err(StoreError::Conflict { .. }) => {
                    conflicts += 1;
                    if conflicts > self.config.max_conflict_retries {
                        return Err(conflicts_exhausted(task_id));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn note_fenced(&self, err: SchedulerError) -> SchedulerError {
        if matches!(err, SchedulerError::Fenced { .. }) {
            self.metrics.record_fenced();
        }
        err
    }
}

fn conflicts_exhausted(task_id: Uuid) -> SchedulerError {
    SchedulerError::Unavailable(format!("conflict retries exhausted for task {}", task_id))
}
