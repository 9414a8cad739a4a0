//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the workflow engine (validation, compilation,
/// submission).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// The task list is empty.
    #[error("workflow must contain at least one task")]
    EmptyWorkflow,

    /// A task has a blank name.
    #[error("all tasks must have a name")]
    MissingName,

    /// Two or more tasks share the same name.
    #[error("duplicate task name found: '{0}'")]
    DuplicateName(String),

    /// A `fathers` entry names a task that isn't in the workflow.
    #[error("task '{task}' depends on unknown father '{father}'")]
    UnresolvedFather { task: String, father: String },

    /// Following `fathers` leads back to a task still being visited.
    #[error("cycle detected involving task '{0}'")]
    CycleDetected(String),

    // ------ Template errors ------

    #[error("unknown workflow template: '{0}'")]
    UnknownTemplate(String),

    #[error("invalid parameters for template '{template}': {message}")]
    InvalidTemplateParams { template: String, message: String },

    // ------ Infrastructure errors ------

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

impl EngineError {
    /// Errors the caller can fix by changing the request.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyWorkflow
                | Self::MissingName
                | Self::DuplicateName(_)
                | Self::UnresolvedFather { .. }
                | Self::CycleDetected(_)
                | Self::UnknownTemplate(_)
                | Self::InvalidTemplateParams { .. }
        )
    }
}
