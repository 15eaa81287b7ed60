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

//! Operational CLI for capstan scheduler databases.
//!
//! Read-only inspection (dead letters, queue depth, single records) plus
//! the administrative cancel path. Points at the same SQLite database the
//! scheduler uses.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use capstan::{SchedulerConfig, SchedulerCoordinator, SqliteTaskStore, TaskStore};

#[derive(Parser)]
#[command(name = "capstanctl", version, about = "Operational tooling for capstan schedulers")]
struct Cli {
    /// Path to the scheduler's SQLite database.
    #[arg(long, env = "CAPSTAN_DATABASE")]
    database: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List dead-lettered tasks.
    DeadLetters {
        /// Maximum number of records to list.
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Report queue depth per priority and lifecycle counters.
    Depth,
    /// Print a single task record.
    Show { task_id: Uuid },
    /// Cancel a task that has not started running.
    Cancel { task_id: Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = Arc::new(
        SqliteTaskStore::open(&cli.database)
            .await
            .with_context(|| format!("failed to open database at {}", cli.database))?,
    );

    match cli.command {
        Command::DeadLetters { limit } => {
            let coordinator =
                SchedulerCoordinator::new(store.clone(), SchedulerConfig::default());
            let dead = coordinator.peek_dead_letters(limit).await?;
            if dead.is_empty() {
                println!("no dead-lettered tasks");
                return Ok(());
            }
            for record in dead {
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
        }
        Command::Depth => {
            let coordinator =
                SchedulerCoordinator::new(store.clone(), SchedulerConfig::default());
            coordinator.recover().await?;
            let depth = coordinator.queue_depth();
            println!("{}", serde_json::to_string_pretty(&depth)?);
        }
        Command::Show { task_id } => {
            let record = store.get(task_id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Cancel { task_id } => {
            let coordinator =
                SchedulerCoordinator::new(store.clone(), SchedulerConfig::default());
            coordinator.cancel(task_id).await?;
            println!("cancelled {}", task_id);
        }
    }

    Ok(())
}
