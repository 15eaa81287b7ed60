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

//! Handler registration and dispatch.
//!
//! One handler is registered per task kind. Handlers report failures as
//! transient (retryable up to the attempt cap) or poison (dead-letter
//! immediately); a panic inside a handler is treated as a crashed worker
//! and reclaimed through lease expiry rather than an explicit failure.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{HandlerError, RegistryError};

/// Executes one attempt for a task payload.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Invoked with the task's payload and the current attempt number
    /// (1-based). Returning an error classifies the failure for the retry
    /// policy.
    async fn execute(
        &self,
        payload: serde_json::Value,
        attempt_count: i32,
    ) -> Result<(), HandlerError>;
}

/// Maps task kinds to their handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a task kind. Duplicate registration is an
    /// error rather than a silent replacement.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        let kind = kind.into();
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::DuplicateHandler { kind });
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    /// Looks up the handler for a task kind.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
