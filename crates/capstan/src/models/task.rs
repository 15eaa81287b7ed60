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

//! Task Model
//!
//! This module defines the task record that the scheduler tracks from enqueue
//! through terminal state, along with its lifecycle states and the failure
//! classification reported by handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle states for a task.
///
/// `Succeeded` and `Dead` are terminal. `Ready` and `FailedRetryable` are the
/// runnable states: both are eligible for dequeue once `eligible_at` has
/// passed, the latter carrying a failure history and a backoff-derived
/// eligibility time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Waiting to be dequeued.
    Ready,
    /// Claimed by a worker under an active lease.
    Leased,
    /// Acknowledged as completed.
    Succeeded,
    /// Failed transiently; runnable again once its backoff delay elapses.
    FailedRetryable,
    /// Permanently failed; kept for dead-letter inspection.
    Dead,
}

impl TaskState {
    /// Stable string form used for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Ready => "Ready",
            TaskState::Leased => "Leased",
            TaskState::Succeeded => "Succeeded",
            TaskState::FailedRetryable => "FailedRetryable",
            TaskState::Dead => "Dead",
        }
    }

    /// Parses the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Ready" => Some(TaskState::Ready),
            "Leased" => Some(TaskState::Leased),
            "Succeeded" => Some(TaskState::Succeeded),
            "FailedRetryable" => Some(TaskState::FailedRetryable),
            "Dead" => Some(TaskState::Dead),
            _ => None,
        }
    }

    /// Whether the state is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Dead)
    }

    /// Whether the task may be dequeued once eligible.
    pub fn is_runnable(&self) -> bool {
        matches!(self, TaskState::Ready | TaskState::FailedRetryable)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classification reported when an attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The failure may resolve on its own; retry up to the attempt cap.
    Transient,
    /// The payload fails deterministically; retrying cannot help.
    Poison,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => f.write_str("transient"),
            FailureKind::Poison => f.write_str("poison"),
        }
    }
}

/// A task record as owned by the task store.
///
/// The store is the single source of truth for these records; the priority
/// index and lease manager hold only derived references (id, priority,
/// timestamps) and are rebuilt from a store scan on startup.
///
/// `version` is an optimistic-concurrency counter: every successful
/// [`crate::store::TaskStore::update`] increments it, and an update whose
/// record carries a stale version fails with a conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique identifier, assigned at enqueue time.
    pub id: Uuid,
    /// Handler-dispatch tag: which registered handler executes this task.
    pub kind: String,
    /// Opaque payload, passed through to the handler unmodified.
    pub payload: serde_json::Value,
    /// Higher values are dequeued first.
    pub priority: i32,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Number of lease grants so far; incremented on each dequeue.
    pub attempt_count: i32,
    /// Cap on attempts; reaching it on failure forces `Dead`.
    pub max_attempts: i32,
    /// The task must not be dequeued before this instant.
    pub eligible_at: DateTime<Utc>,
    /// Token of the active lease, present only while `Leased`.
    pub lease_id: Option<Uuid>,
    /// Deadline of the active lease, present only while `Leased`.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Most recent failure message, kept for dead-letter inspection.
    pub last_error: Option<String>,
    /// Optimistic-concurrency counter.
    pub version: i64,
    /// Timestamp when the record was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp when the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Builds a new `Ready` record for enqueue.
    pub fn new(
        kind: impl Into<String>,
        payload: serde_json::Value,
        priority: i32,
        max_attempts: i32,
        delay: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
            priority,
            state: TaskState::Ready,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            eligible_at: deadline_after(now, delay),
            lease_id: None,
            lease_expires_at: None,
            last_error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the record holds the given lease token.
    pub fn holds_lease(&self, lease_id: Uuid) -> bool {
        self.state == TaskState::Leased && self.lease_id == Some(lease_id)
    }

    /// Clears lease fields; used on every transition out of `Leased`.
    pub(crate) fn clear_lease(&mut self) {
        self.lease_id = None;
        self.lease_expires_at = None;
    }
}

/// `start + duration`, saturating at the far end of the timeline instead of
/// panicking on out-of-range arithmetic.
pub(crate) fn deadline_after(start: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| start.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
