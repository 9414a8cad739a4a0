//! The `TaskHandler` trait — the contract every step handler must fulfil.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::{ChildrenValues, NodeError, WorkflowResult};

/// Per-step context passed to a handler.
///
/// Defined here (in the nodes crate) so both the engine and individual handler
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Logical workflow this step belongs to.
    pub workflow_id: Uuid,
    /// Substrate-assigned id of the job running this step.
    pub job_id: String,
    /// Step name, unique within the workflow.
    pub task_name: String,
    /// Declared step type (routing discriminator).
    pub task_type: String,
    /// Whether the step's identity is externally significant.
    pub track: bool,
    /// Opaque data for the handler.
    pub payload: Value,
}

/// The core handler trait.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Registry key, `"<type>"` or `"<type>:<target>"`.
    fn task_type(&self) -> &str;

    /// Run the step. `children` holds only the results of the step's declared
    /// fathers, never the full execution history.
    async fn handle(
        &self,
        ctx: &ExecutionContext,
        children: &ChildrenValues,
    ) -> Result<WorkflowResult, NodeError>;
}
