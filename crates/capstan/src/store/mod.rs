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

//! Task Store
//!
//! The durable record of tasks and their states — the scheduler's single
//! source of truth. Updates use optimistic concurrency: each record carries
//! a version counter, and an update whose version is stale fails with
//! [`StoreError::Conflict`], forcing the caller to re-read and retry. This
//! keeps mutating operations serializable per task without a global lock.
//!
//! Two implementations share the contract: [`MemoryTaskStore`] for embedded
//! use and tests, and [`SqliteTaskStore`] for durable deployments where an
//! acknowledged write must survive a process crash.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::task::{TaskRecord, TaskState};

mod memory;
mod sqlite;

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

/// Filter for [`TaskStore::scan`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to these states; `None` matches every state.
    pub states: Option<Vec<TaskState>>,
    /// Maximum number of records to return.
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn with_states(states: impl Into<Vec<TaskState>>) -> Self {
        Self {
            states: Some(states.into()),
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, record: &TaskRecord) -> bool {
        match &self.states {
            Some(states) => states.contains(&record.state),
            None => true,
        }
    }
}

/// Contract for the durable task record store.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persists a new task record.
    async fn put(&self, record: TaskRecord) -> Result<(), StoreError>;

    /// Fetches a record by id.
    async fn get(&self, id: Uuid) -> Result<TaskRecord, StoreError>;

    /// Atomically replaces a record if `record.version` still matches the
    /// stored version. On success the returned record carries the
    /// incremented version and a fresh `updated_at`.
    async fn update(&self, record: TaskRecord) -> Result<TaskRecord, StoreError>;

    /// Returns records matching the filter, ordered by creation time.
    /// Used for recovery scans and dead-letter inspection.
    async fn scan(&self, filter: TaskFilter) -> Result<Vec<TaskRecord>, StoreError>;
}
