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

//! Lease Manager
//!
//! Tracks the active lease for each in-flight task. A lease is a
//! time-bounded claim identified by a random token; any operation arriving
//! with a token that does not match the active lease is fenced, which stops
//! a straggling worker from mutating state after its lease was reassigned.
//!
//! Like the priority index, this is a derived structure: the task store
//! holds the authoritative lease fields, and the manager is rebuilt from a
//! store scan on startup (honoring stored deadlines rather than resetting
//! them).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::models::task::deadline_after;

/// An active claim over one task by one worker attempt.
#[derive(Debug, Clone, Copy)]
pub struct Lease {
    pub lease_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Why a lease operation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseFault {
    /// The token matched but the deadline has already passed.
    Expired,
    /// The token does not match the active lease (or there is none).
    Fenced,
}

/// In-memory table of active leases.
#[derive(Debug, Default)]
pub struct LeaseManager {
    active: HashMap<Uuid, Lease>,
}

impl LeaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants a fresh lease over a task, replacing any previous entry.
    /// The returned token is unique per grant.
    pub fn grant(&mut self, task_id: Uuid, duration: Duration, now: DateTime<Utc>) -> Lease {
        let lease = Lease {
            lease_id: Uuid::new_v4(),
            expires_at: deadline_after(now, duration),
        };
        self.active.insert(task_id, lease);
        lease
    }

    /// Re-registers a lease recovered from the store, keeping its original
    /// token and deadline so pre-crash leases expire naturally.
    pub fn register(&mut self, task_id: Uuid, lease_id: Uuid, expires_at: DateTime<Utc>) {
        self.active.insert(task_id, Lease {
            lease_id,
            expires_at,
        });
    }

    /// Verifies that `lease_id` is the active, unexpired lease for the task.
    pub fn check(&self, task_id: Uuid, lease_id: Uuid, now: DateTime<Utc>) -> Result<(), LeaseFault> {
        match self.active.get(&task_id) {
            Some(lease) if lease.lease_id == lease_id => {
                if lease.expires_at <= now {
                    Err(LeaseFault::Expired)
                } else {
                    Ok(())
                }
            }
            _ => Err(LeaseFault::Fenced),
        }
    }

    /// Pushes the lease deadline out by `extra`. Returns the new deadline.
    pub fn extend(
        &mut self,
        task_id: Uuid,
        lease_id: Uuid,
        extra: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, LeaseFault> {
        self.check(task_id, lease_id, now)?;
        let lease = self
            .active
            .get_mut(&task_id)
            .ok_or(LeaseFault::Fenced)?;
        lease.expires_at = deadline_after(lease.expires_at, extra);
        Ok(lease.expires_at)
    }

    /// Releases a lease on ack/fail. Fenced if the token no longer matches.
    pub fn release(&mut self, task_id: Uuid, lease_id: Uuid) -> Result<(), LeaseFault> {
        match self.active.get(&task_id) {
            Some(lease) if lease.lease_id == lease_id => {
                self.active.remove(&task_id);
                Ok(())
            }
            _ => Err(LeaseFault::Fenced),
        }
    }

    /// Drops a lease entry unconditionally (expiry sweep).
    pub fn remove(&mut self, task_id: Uuid) {
        self.active.remove(&task_id);
    }

    /// Lists `(task_id, lease_id)` pairs whose deadline has passed.
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<(Uuid, Uuid)> {
        self.active
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(task_id, lease)| (*task_id, lease.lease_id))
            .collect()
    }

    pub fn get(&self, task_id: Uuid) -> Option<&Lease> {
        self.active.get(&task_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
