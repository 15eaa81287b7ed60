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

//! # Capstan
//!
//! A library for durable, priority-ordered task scheduling with
//! at-least-once execution, bounded retries, visibility-timeout leases, and
//! dead-lettering.
//!
//! Producers enqueue opaque payloads tagged with a priority and scheduling
//! metadata; a pool of concurrent workers dequeues them in (priority,
//! eligibility, FIFO) order under time-bounded leases. A failed attempt is
//! retried after an exponential backoff with jitter until the attempt cap
//! is reached; poison payloads and exhausted tasks land in a dead-letter
//! set for operator inspection. Leases that expire without an ack or fail —
//! a crashed worker, a hung handler — are swept back to the ready set
//! automatically.
//!
//! ## Architecture
//!
//! - [`store::TaskStore`] — the durable source of truth, with optimistic
//!   concurrency (version compare-and-swap). SQLite via Diesel for durable
//!   deployments ([`SqliteTaskStore`]), in-memory for embedded use
//!   ([`MemoryTaskStore`]).
//! - [`index::PriorityIndex`] — derived, in-memory ordering of runnable
//!   tasks.
//! - [`lease::LeaseManager`] — derived table of active leases with fencing
//!   by unique token.
//! - [`retry::RetryPolicy`] — pure retry/dead-letter decision with backoff.
//! - [`coordinator::SchedulerCoordinator`] — the façade enforcing every
//!   invariant; the only component that touches the other four.
//! - [`worker::WorkerPool`] — bounded concurrent executors dispatching to
//!   registered [`worker::TaskHandler`]s.
//!
//! On startup, [`SchedulerCoordinator::recover`] rebuilds the index and
//! lease table entirely from a store scan; in-flight leases keep their
//! stored deadlines.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use capstan::{
//!     HandlerRegistry, SchedulerConfig, SchedulerCoordinator, SqliteTaskStore,
//!     WorkerPool, WorkerPoolConfig,
//! };
//!
//! let store = Arc::new(SqliteTaskStore::open("capstan.db").await?);
//! let coordinator = Arc::new(SchedulerCoordinator::new(store, SchedulerConfig::default()));
//! coordinator.recover().await?;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("send-email", Arc::new(SendEmail))?;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! coordinator.clone().spawn_lease_sweeper(shutdown_rx.clone());
//!
//! let pool = WorkerPool::new(
//!     coordinator.clone(),
//!     Arc::new(registry),
//!     WorkerPoolConfig::default(),
//! );
//! tokio::spawn(async move { pool.run(shutdown_rx).await });
//!
//! coordinator
//!     .enqueue("send-email", serde_json::json!({"to": "ops"}), 5, 3, Duration::ZERO)
//!     .await?;
//! ```

pub mod config;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod index;
pub mod lease;
pub mod models;
pub mod retry;
pub mod stats;
pub mod store;
pub mod worker;

pub use config::{SchedulerConfig, WorkerPoolConfig};
pub use coordinator::{LeasedTask, RecoveryReport, SchedulerCoordinator};
pub use database::Database;
pub use error::{HandlerError, RegistryError, SchedulerError, StoreError, WorkerError};
pub use models::task::{FailureKind, TaskRecord, TaskState};
pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy};
pub use stats::{MetricsSnapshot, QueueDepth};
pub use store::{MemoryTaskStore, SqliteTaskStore, TaskFilter, TaskStore};
pub use worker::{HandlerRegistry, TaskHandler, WorkerPool};
