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

//! Async SQLite connection pooling via `deadpool-diesel`.
//!
//! All store operations run through [`Database::interact`], which hands a
//! pooled connection to a blocking closure on the pool's worker thread and
//! maps pool and driver failures into [`StoreError::Unavailable`]. Pending
//! embedded migrations run once at connect time.

use deadpool_diesel::sqlite::{Manager, Pool, Runtime};
use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use crate::error::StoreError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Async SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
}

impl Database {
    /// Opens (creating if necessary) the database at `path` and runs any
    /// pending migrations. `path` may be a file path or `:memory:`.
    pub async fn connect(path: &str, pool_size: usize) -> Result<Self, StoreError> {
        let manager = Manager::new(path.to_string(), Runtime::Tokio1);
        let pool = Pool::builder(manager)
            .max_size(pool_size)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let database = Self { pool };
        database.run_migrations().await?;
        info!("Connected to scheduler database at {}", path);
        Ok(database)
    }

    /// Runs a blocking closure against a pooled connection.
    pub(crate) async fn interact<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, diesel::result::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        conn.interact(move |conn| {
            // Concurrent writers back off instead of failing with SQLITE_BUSY.
            diesel::sql_query("PRAGMA busy_timeout = 5000").execute(conn)?;
            op(conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
        .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        conn.interact(|conn| {
            conn.run_pending_migrations(MIGRATIONS)
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
        .map_err(StoreError::Unavailable)
    }
}
