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

//! Durable SQLite task store.
//!
//! Records live in the `tasks` table with UUIDs as BLOBs and timestamps as
//! RFC3339 TEXT; the `DbTask` model converts to and from the domain record
//! at the store boundary. The optimistic-concurrency update is a single
//! `UPDATE ... WHERE id = ? AND version = ?` statement, so the
//! compare-and-swap is atomic without an explicit transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::{TaskFilter, TaskStore};
use crate::database::schema::tasks;
use crate::database::Database;
use crate::error::StoreError;
use crate::models::task::{TaskRecord, TaskState};

const DEFAULT_POOL_SIZE: usize = 4;

/// Diesel model for a `tasks` row.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
struct DbTask {
    id: Vec<u8>,
    kind: String,
    payload: String,
    priority: i32,
    state: String,
    attempt_count: i32,
    max_attempts: i32,
    eligible_at: String,
    lease_id: Option<Vec<u8>>,
    lease_expires_at: Option<String>,
    last_error: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl DbTask {
    fn from_domain(record: &TaskRecord) -> Self {
        Self {
            id: record.id.as_bytes().to_vec(),
            kind: record.kind.clone(),
            payload: record.payload.to_string(),
            priority: record.priority,
            state: record.state.as_str().to_string(),
            attempt_count: record.attempt_count,
            max_attempts: record.max_attempts,
            eligible_at: record.eligible_at.to_rfc3339(),
            lease_id: record.lease_id.map(|id| id.as_bytes().to_vec()),
            lease_expires_at: record.lease_expires_at.map(|t| t.to_rfc3339()),
            last_error: record.last_error.clone(),
            version: record.version,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }

    fn into_domain(self) -> Result<TaskRecord, StoreError> {
        let id = Uuid::from_slice(&self.id).map_err(|e| StoreError::Corrupt {
            id: Uuid::nil(),
            message: format!("invalid task id: {}", e),
        })?;
        let corrupt = |message: String| StoreError::Corrupt { id, message };

        let state = TaskState::parse(&self.state)
            .ok_or_else(|| corrupt(format!("unknown state '{}'", self.state)))?;
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| corrupt(format!("invalid payload: {}", e)))?;
        let lease_id = match self.lease_id {
            Some(bytes) => Some(
                Uuid::from_slice(&bytes).map_err(|e| corrupt(format!("invalid lease id: {}", e)))?,
            ),
            None => None,
        };
        let lease_expires_at = match self.lease_expires_at {
            Some(text) => Some(parse_timestamp(&text).map_err(&corrupt)?),
            None => None,
        };

        Ok(TaskRecord {
            id,
            kind: self.kind,
            payload,
            priority: self.priority,
            state,
            attempt_count: self.attempt_count,
            max_attempts: self.max_attempts,
            eligible_at: parse_timestamp(&self.eligible_at).map_err(&corrupt)?,
            lease_id,
            lease_expires_at,
            last_error: self.last_error,
            version: self.version,
            created_at: parse_timestamp(&self.created_at).map_err(&corrupt)?,
            updated_at: parse_timestamp(&self.updated_at).map_err(&corrupt)?,
        })
    }
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{}': {}", text, e))
}

/// Diesel-backed task store over a pooled SQLite database.
#[derive(Clone)]
pub struct SqliteTaskStore {
    database: Database,
}

impl SqliteTaskStore {
    /// Opens the database at `path`, running pending migrations.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let database = Database::connect(path, DEFAULT_POOL_SIZE).await?;
        Ok(Self { database })
    }

    /// Wraps an already-connected database.
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn put(&self, record: TaskRecord) -> Result<(), StoreError> {
        let row = DbTask::from_domain(&record);
        self.database
            .interact(move |conn| {
                diesel::insert_into(tasks::table)
                    .values(&row)
                    .execute(conn)
            })
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<TaskRecord, StoreError> {
        let id_bytes = id.as_bytes().to_vec();
        let row: Option<DbTask> = self
            .database
            .interact(move |conn| {
                tasks::table
                    .find(id_bytes)
                    .first::<DbTask>(conn)
                    .optional()
            })
            .await?;
        row.ok_or(StoreError::NotFound(id))?.into_domain()
    }

    async fn update(&self, record: TaskRecord) -> Result<TaskRecord, StoreError> {
        let expected = record.version;
        let mut updated = record;
        updated.version = expected + 1;
        updated.updated_at = Utc::now();

        let row = DbTask::from_domain(&updated);
        let id = updated.id;
        let id_bytes = id.as_bytes().to_vec();
        let affected = self
            .database
            .interact(move |conn| {
                diesel::update(
                    tasks::table
                        .filter(tasks::id.eq(id_bytes))
                        .filter(tasks::version.eq(expected)),
                )
                .set(&row)
                .execute(conn)
            })
            .await?;

        if affected == 0 {
            // Distinguish a lost race from a missing record.
            self.get(id).await?;
            return Err(StoreError::Conflict { id, expected });
        }
        Ok(updated)
    }

    async fn scan(&self, filter: TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let states: Option<Vec<String>> = filter
            .states
            .map(|states| states.iter().map(|s| s.as_str().to_string()).collect());
        let limit = filter.limit.map(|l| l as i64);

        let rows: Vec<DbTask> = self
            .database
            .interact(move |conn| {
                let mut query = tasks::table.into_boxed();
                if let Some(states) = states {
                    query = query.filter(tasks::state.eq_any(states));
                }
                query = query.order(tasks::created_at.asc());
                if let Some(limit) = limit {
                    query = query.limit(limit);
                }
                query.load::<DbTask>(conn)
            })
            .await?;

        rows.into_iter().map(DbTask::into_domain).collect()
    }
}
