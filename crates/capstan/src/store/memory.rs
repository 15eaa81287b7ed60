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

//! In-memory task store.
//!
//! Same contract and compare-and-swap semantics as the SQLite store, without
//! durability. Suitable for embedded single-process deployments and tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{TaskFilter, TaskStore};
use crate::error::StoreError;
use crate::models::task::TaskRecord;

/// Mutex-guarded map of task records.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn put(&self, record: TaskRecord) -> Result<(), StoreError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<TaskRecord, StoreError> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn update(&self, record: TaskRecord) -> Result<TaskRecord, StoreError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let stored = tasks
            .get_mut(&record.id)
            .ok_or(StoreError::NotFound(record.id))?;
        if stored.version != record.version {
            return Err(StoreError::Conflict {
                id: record.id,
                expected: record.version,
            });
        }
        let mut updated = record;
        updated.version += 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn scan(&self, filter: TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut matched: Vec<TaskRecord> = tasks
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        matched.sort_by_key(|record| record.created_at);
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}
