//! `MockHandler` — a test double for `TaskHandler`.
//!
//! Useful in unit and integration tests where a real handler implementation is
//! either unavailable or irrelevant. Every call records the filtered children
//! values the handler was shown.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::{should_skip, ChildrenValues, ExecutionContext, NodeError, TaskHandler, WorkflowResult};

/// Behaviour injected into `MockHandler` at construction time.
pub enum MockBehaviour {
    /// Return `{ "task": <name>, ..value }`, honouring the skip convention.
    ReturnValue(Value),
    /// Always return a skip result.
    Skip,
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with `Retryable` for the first `n` calls, then behave like `ReturnValue`.
    FailTimes(u32, Value),
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub task_name: String,
    pub children: ChildrenValues,
}

/// A mock handler that records every call it receives and returns a
/// programmer-specified result.
pub struct MockHandler {
    /// Registry key this handler answers to.
    pub key: String,
    /// What the handler will do when `handle` is called.
    pub behaviour: MockBehaviour,
    /// All calls seen by this handler (in call order).
    pub calls: Arc<Mutex<Vec<MockCall>>>,
    failures: AtomicU32,
}

impl MockHandler {
    fn with_behaviour(key: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            key: key.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: AtomicU32::new(0),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(key: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(key, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always asks its dependents to skip.
    pub fn skipping(key: impl Into<String>) -> Self {
        Self::with_behaviour(key, MockBehaviour::Skip)
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(key, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(key, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that fails `times` times before succeeding.
    pub fn flaky(key: impl Into<String>, times: u32, value: Value) -> Self {
        Self::with_behaviour(key, MockBehaviour::FailTimes(times, value))
    }

    /// Number of times this handler has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Children values seen by the most recent call.
    pub fn last_children(&self) -> Option<ChildrenValues> {
        self.calls.lock().last().map(|c| c.children.clone())
    }

    fn succeed(&self, ctx: &ExecutionContext, children: &ChildrenValues, value: &Value) -> WorkflowResult {
        if should_skip(children) {
            return WorkflowResult::skip(Value::Null);
        }
        let mut out = json!({ "task": ctx.task_name });
        if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), value.as_object()) {
            for (k, val) in v_obj {
                out_obj.insert(k.clone(), val.clone());
            }
        }
        WorkflowResult::proceed(out)
    }
}

#[async_trait]
impl TaskHandler for MockHandler {
    fn task_type(&self) -> &str {
        &self.key
    }

    async fn handle(
        &self,
        ctx: &ExecutionContext,
        children: &ChildrenValues,
    ) -> Result<WorkflowResult, NodeError> {
        self.calls.lock().push(MockCall {
            task_name: ctx.task_name.clone(),
            children: children.clone(),
        });

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(self.succeed(ctx, children, v)),
            MockBehaviour::Skip => Ok(WorkflowResult::skip(Value::Null)),
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
            MockBehaviour::FailTimes(times, v) => {
                if self.failures.fetch_add(1, Ordering::SeqCst) < *times {
                    Err(NodeError::Retryable(format!("{} not ready yet", ctx.task_name)))
                } else {
                    Ok(self.succeed(ctx, children, v))
                }
            }
        }
    }
}
