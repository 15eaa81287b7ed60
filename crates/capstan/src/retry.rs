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

//! Retry policy and backoff computation.
//!
//! The policy is a pure decision function invoked by the coordinator on every
//! `fail` call: it never touches storage. Poison failures dead-letter
//! immediately; transient failures retry with a backoff-derived delay until
//! the attempt cap is reached.

use rand::Rng;
use std::time::Duration;

use crate::models::task::FailureKind;

/// Strategy for growing the delay between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// Every retry waits `initial_delay`.
    Fixed,
    /// Delay grows linearly with the attempt number.
    Linear { multiplier: f64 },
    /// Delay grows as `base^attempt`.
    Exponential { base: f64, multiplier: f64 },
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue the task, eligible again after `delay`.
    Retry { delay: Duration },
    /// Transition the task to the dead-letter set.
    Dead,
}

/// Policy deciding whether and when a failed task runs again.
///
/// Delays are clamped to `max_delay`; when `jitter` is enabled a random
/// value in `[0, delay / 2]` is added on top to spread out re-contention
/// after correlated failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for the computed (pre-jitter) delay.
    pub max_delay: Duration,
    /// How the delay grows across attempts.
    pub backoff_strategy: BackoffStrategy,
    /// Whether to add random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30000),
            backoff_strategy: BackoffStrategy::Exponential {
                base: 2.0,
                multiplier: 1.0,
            },
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Decides the fate of a task whose attempt just failed.
    ///
    /// `attempt_count` is the number of lease grants so far, so the attempt
    /// that just failed is attempt `attempt_count`. Reaching `max_attempts`
    /// on failure always yields `Dead`, never another retry; a `Poison`
    /// failure yields `Dead` regardless of remaining attempts.
    pub fn decide(
        &self,
        attempt_count: i32,
        max_attempts: i32,
        failure_kind: FailureKind,
    ) -> RetryDecision {
        if failure_kind == FailureKind::Poison {
            return RetryDecision::Dead;
        }
        if attempt_count >= max_attempts {
            return RetryDecision::Dead;
        }
        RetryDecision::Retry {
            delay: self.delay_for_attempt(attempt_count),
        }
    }

    /// Computes the backoff delay for the given attempt number.
    pub fn delay_for_attempt(&self, attempt: i32) -> Duration {
        let attempt = attempt.clamp(1, 32);
        let initial_ms = self.initial_delay.as_millis() as f64;
        let raw_ms = match self.backoff_strategy {
            BackoffStrategy::Fixed => initial_ms,
            BackoffStrategy::Linear { multiplier } => initial_ms * multiplier * attempt as f64,
            BackoffStrategy::Exponential { base, multiplier } => {
                initial_ms * multiplier * base.powi(attempt)
            }
        };
        let clamped_ms = raw_ms.min(self.max_delay.as_millis() as f64).max(0.0) as u64;
        let mut delay = Duration::from_millis(clamped_ms);

        if self.jitter && clamped_ms > 0 {
            let jitter_ms = rand::thread_rng().gen_range(0..=clamped_ms / 2);
            delay += Duration::from_millis(jitter_ms);
        }

        delay
    }
}
