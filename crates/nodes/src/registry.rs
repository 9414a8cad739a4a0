//! Dispatch table from handler key to implementation.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::{NodeError, TaskHandler};

/// Derive the registry key for a step: `"<type>:<target>"` when the payload
/// carries a string `target`, otherwise just `"<type>"`.
pub fn handler_key(task_type: &str, payload: &Value) -> String {
    match payload.get("target").and_then(Value::as_str) {
        Some(target) => format!("{task_type}:{target}"),
        None => task_type.to_owned(),
    }
}

/// Maps handler keys to shared `TaskHandler` implementations.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own [`TaskHandler::task_type`] key.
    /// A later registration for the same key replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> &mut Self {
        let key = handler.task_type().to_owned();
        if self.handlers.insert(key.clone(), handler).is_some() {
            warn!("handler for '{}' replaced", key);
        }
        self
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Look up a handler.
    ///
    /// # Errors
    /// [`NodeError::Fatal`] when no handler is registered for `key`; an
    /// unknown key can never succeed on retry.
    pub fn resolve(&self, key: &str) -> Result<Arc<dyn TaskHandler>, NodeError> {
        self.handlers
            .get(key)
            .cloned()
            .ok_or_else(|| NodeError::Fatal(format!("no handler registered for task type: {key}")))
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
