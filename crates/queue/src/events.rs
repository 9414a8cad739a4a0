//! Queue-wide lifecycle events.

use serde::{Deserialize, Serialize};

/// Published on the queue the job belongs to once it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Completed { job_id: String },
    Failed { job_id: String, reason: String },
}

impl QueueEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Completed { job_id } | Self::Failed { job_id, .. } => job_id,
        }
    }
}
