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

//! Priority Index
//!
//! In-memory ordering of runnable tasks. `pop_highest` returns the best
//! candidate under the composite ordering (priority descending, eligibility
//! ascending, insertion sequence ascending), which makes dequeue order
//! deterministic and FIFO among equals. Tasks whose eligibility lies in the
//! future are kept in a separate time-ordered set and promoted lazily at pop
//! time.
//!
//! The index is a derived structure: it holds task ids and ordering data
//! only, never payloads, and is rebuilt from a task-store scan on startup.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// Ordering key for the poppable set. Field order drives the derived
/// lexicographic ordering: priority descending (via `Reverse`), then
/// eligibility ascending, then insertion sequence ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    priority: Reverse<i32>,
    eligible_at: DateTime<Utc>,
    seq: u64,
    task_id: Uuid,
}

/// Ordering key for the delayed set: earliest eligibility first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct DelayedKey {
    eligible_at: DateTime<Utc>,
    seq: u64,
    task_id: Uuid,
    priority: i32,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    priority: i32,
    eligible_at: DateTime<Utc>,
    seq: u64,
    delayed: bool,
}

/// Entry returned by [`PriorityIndex::pop_highest`]. Carries enough ordering
/// data for the caller to re-insert the entry if the dequeue cannot be
/// persisted — a pop is not durable until the leased state lands in the
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub task_id: Uuid,
    pub priority: i32,
    pub eligible_at: DateTime<Utc>,
}

/// Priority-ordered index over runnable task ids.
#[derive(Debug, Default)]
pub struct PriorityIndex {
    ready: BTreeSet<ReadyKey>,
    delayed: BTreeSet<DelayedKey>,
    entries: HashMap<Uuid, Slot>,
    next_seq: u64,
}

impl PriorityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a task. Idempotent per task id: re-inserting an indexed task
    /// is a no-op, so a task can never occupy two positions at once.
    pub fn insert(
        &mut self,
        task_id: Uuid,
        priority: i32,
        eligible_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        if self.entries.contains_key(&task_id) {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;

        let delayed = eligible_at > now;
        if delayed {
            self.delayed.insert(DelayedKey {
                eligible_at,
                seq,
                task_id,
                priority,
            });
        } else {
            self.ready.insert(ReadyKey {
                priority: Reverse(priority),
                eligible_at,
                seq,
                task_id,
            });
        }
        self.entries.insert(
            task_id,
            Slot {
                priority,
                eligible_at,
                seq,
                delayed,
            },
        );
    }

    /// Pops the highest-priority eligible entry, promoting any delayed
    /// entries that have become eligible first.
    pub fn pop_highest(&mut self, now: DateTime<Utc>) -> Option<IndexEntry> {
        self.promote_due(now);
        let key = self.ready.pop_first()?;
        self.entries.remove(&key.task_id);
        Some(IndexEntry {
            task_id: key.task_id,
            priority: key.priority.0,
            eligible_at: key.eligible_at,
        })
    }

    /// Removes a task from the index. Returns whether it was present.
    pub fn remove(&mut self, task_id: Uuid) -> bool {
        let Some(slot) = self.entries.remove(&task_id) else {
            return false;
        };
        if slot.delayed {
            self.delayed.remove(&DelayedKey {
                eligible_at: slot.eligible_at,
                seq: slot.seq,
                task_id,
                priority: slot.priority,
            });
        } else {
            self.ready.remove(&ReadyKey {
                priority: Reverse(slot.priority),
                eligible_at: slot.eligible_at,
                seq: slot.seq,
                task_id,
            });
        }
        true
    }

    /// Moves delayed entries whose eligibility has passed into the poppable
    /// set, preserving their original insertion sequence.
    pub fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some(first) = self.delayed.first().copied() {
            if first.eligible_at > now {
                break;
            }
            self.delayed.remove(&first);
            self.ready.insert(ReadyKey {
                priority: Reverse(first.priority),
                eligible_at: first.eligible_at,
                seq: first.seq,
                task_id: first.task_id,
            });
            if let Some(slot) = self.entries.get_mut(&first.task_id) {
                slot.delayed = false;
            }
        }
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.entries.contains_key(&task_id)
    }

    /// Number of indexed tasks, eligible and delayed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of immediately poppable tasks.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Number of tasks held back by a future eligibility time.
    pub fn delayed_len(&self) -> usize {
        self.delayed.len()
    }

    /// Count of indexed tasks per priority.
    pub fn depth_by_priority(&self) -> BTreeMap<i32, usize> {
        let mut depth = BTreeMap::new();
        for slot in self.entries.values() {
            *depth.entry(slot.priority).or_insert(0) += 1;
        }
        depth
    }
}
