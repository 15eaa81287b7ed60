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

//! Error types for the scheduler core.
//!
//! The taxonomy mirrors the operations: the store surfaces `NotFound`,
//! `Conflict`, and `Unavailable`; the coordinator absorbs `Conflict`
//! internally (bounded retries) and surfaces `Fenced`, `NotFound`,
//! `LeaseExpired`, `InvalidState`, and `Unavailable` to callers. `Fenced`
//! means the supplied lease token no longer matches the active lease —
//! the caller's result no longer matters and must not be retried.

use thiserror::Error;
use uuid::Uuid;

use crate::models::task::{FailureKind, TaskState};

/// Errors surfaced by a task store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No task with the given id exists.
    #[error("task not found: {0}")]
    NotFound(Uuid),

    /// The optimistic-concurrency check failed: the record changed since it
    /// was read. Callers re-read and retry.
    #[error("version conflict on task {id} (expected version {expected})")]
    Conflict { id: Uuid, expected: i64 },

    /// A stored record could not be decoded into a task.
    #[error("corrupt record for task {id}: {message}")]
    Corrupt { id: Uuid, message: String },

    /// The backing store is unreachable or rejected the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the scheduler coordinator.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No task with the given id exists.
    #[error("task not found: {0}")]
    NotFound(Uuid),

    /// The supplied lease token does not match the active lease.
    #[error("lease {lease_id} is no longer active for task {task_id}")]
    Fenced { task_id: Uuid, lease_id: Uuid },

    /// The lease matched but its deadline has already passed.
    #[error("lease {lease_id} for task {task_id} has expired")]
    LeaseExpired { task_id: Uuid, lease_id: Uuid },

    /// The task is not in a state that permits the requested operation.
    #[error("task {task_id} is {state} and cannot be modified by this operation")]
    InvalidState { task_id: Uuid, state: TaskState },

    /// The store is unreachable; the caller should retry with its own backoff.
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => SchedulerError::NotFound(id),
            other => SchedulerError::Unavailable(other.to_string()),
        }
    }
}

/// Error reported by a task handler for a failed attempt.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The attempt failed for a reason that may resolve on its own.
    #[error("transient failure: {message}")]
    Transient { message: String },

    /// The payload fails deterministically; retrying cannot help.
    #[error("poison payload: {message}")]
    Poison { message: String },
}

impl HandlerError {
    /// Convenience constructor for a transient failure.
    pub fn transient(message: impl Into<String>) -> Self {
        HandlerError::Transient {
            message: message.into(),
        }
    }

    /// Convenience constructor for a poison-payload failure.
    pub fn poison(message: impl Into<String>) -> Self {
        HandlerError::Poison {
            message: message.into(),
        }
    }

    /// The failure classification the retry policy consumes.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            HandlerError::Transient { .. } => FailureKind::Transient,
            HandlerError::Poison { .. } => FailureKind::Poison,
        }
    }
}

/// Errors from handler registration.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A handler is already registered for this task kind.
    #[error("a handler is already registered for kind '{kind}'")]
    DuplicateHandler { kind: String },
}

/// Errors surfaced by the worker pool run loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// An operation against the coordinator failed.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// The pool's concurrency primitive was closed during shutdown.
    #[error("worker pool is shutting down")]
    ShuttingDown,
}
