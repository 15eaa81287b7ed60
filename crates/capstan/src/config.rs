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

//! Configuration for the coordinator and the worker pool.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Configuration for [`crate::coordinator::SchedulerCoordinator`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How many times a version-conflict race is retried internally before
    /// the operation surfaces as unavailable.
    pub max_conflict_retries: u32,
    /// Interval between lease-expiry sweeps when the background sweeper is
    /// running.
    pub sweep_interval: Duration,
    /// Retry policy consulted on every `fail` call.
    pub retry_policy: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            sweep_interval: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Configuration for [`crate::worker::WorkerPool`].
///
/// # Construction
///
/// Use [`WorkerPoolConfig::builder()`] to override defaults:
///
/// ```rust,ignore
/// let config = WorkerPoolConfig::builder()
///     .max_concurrent_tasks(8)
///     .handler_timeout(Duration::from_secs(600))
///     .build();
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct WorkerPoolConfig {
    max_concurrent_tasks: usize,
    poll_interval: Duration,
    lease_duration: Duration,
    handler_timeout: Duration,
}

impl WorkerPoolConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> WorkerPoolConfigBuilder {
        WorkerPoolConfigBuilder::default()
    }

    /// Maximum number of concurrently executing tasks.
    pub fn max_concurrent_tasks(&self) -> usize {
        self.max_concurrent_tasks
    }

    /// How often the pool polls the coordinator for work.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Lease duration requested on each dequeue.
    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Maximum wall-clock time granted to a handler before the pool stops
    /// waiting and leaves the lease to expire.
    pub fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            poll_interval: Duration::from_millis(250),
            lease_duration: Duration::from_secs(30),
            handler_timeout: Duration::from_secs(25),
        }
    }
}

/// Builder for [`WorkerPoolConfig`].
#[derive(Debug, Default)]
pub struct WorkerPoolConfigBuilder {
    max_concurrent_tasks: Option<usize>,
    poll_interval: Option<Duration>,
    lease_duration: Option<Duration>,
    handler_timeout: Option<Duration>,
}

impl WorkerPoolConfigBuilder {
    pub fn max_concurrent_tasks(mut self, value: usize) -> Self {
        self.max_concurrent_tasks = Some(value);
        self
    }

    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = Some(value);
        self
    }

    pub fn lease_duration(mut self, value: Duration) -> Self {
        self.lease_duration = Some(value);
        self
    }

    pub fn handler_timeout(mut self, value: Duration) -> Self {
        self.handler_timeout = Some(value);
        self
    }

    pub fn build(self) -> WorkerPoolConfig {
        let defaults = WorkerPoolConfig::default();
        WorkerPoolConfig {
            max_concurrent_tasks: self
                .max_concurrent_tasks
                .unwrap_or(defaults.max_concurrent_tasks),
            poll_interval: self.poll_interval.unwrap_or(defaults.poll_interval),
            lease_duration: self.lease_duration.unwrap_or(defaults.lease_duration),
            handler_timeout: self.handler_timeout.unwrap_or(defaults.handler_timeout),
        }
    }
}
