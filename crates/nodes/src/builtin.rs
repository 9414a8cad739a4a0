//! Built-in handlers shipped with the runtime.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::{should_skip, ChildrenValues, ExecutionContext, NodeError, TaskHandler, WorkflowResult};

/// Echoes its payload and the names of the fathers it could see.
///
/// Stands in for business handlers that live outside this workspace, so a
/// template can run end-to-end on a bare runtime.
pub struct PassthroughHandler {
    key: String,
}

impl PassthroughHandler {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl TaskHandler for PassthroughHandler {
    fn task_type(&self) -> &str {
        &self.key
    }

    async fn handle(
        &self,
        ctx: &ExecutionContext,
        children: &ChildrenValues,
    ) -> Result<WorkflowResult, NodeError> {
        if should_skip(children) {
            debug!(task = %ctx.task_name, "upstream asked to skip");
            return Ok(WorkflowResult::skip(json!({})));
        }

        let upstream: Vec<&str> = children.keys().map(String::as_str).collect();
        Ok(WorkflowResult::proceed(json!({
            "task": ctx.task_name,
            "payload": ctx.payload,
            "upstream": upstream,
        })))
    }
}
