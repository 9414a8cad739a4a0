//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models — they carry no domain behaviour.
//! Domain types live in the `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflow
// ---------------------------------------------------------------------------

/// Lifecycle of a workflow record.
///
/// Besides the three statuses the orchestrator writes itself, the record
/// mirrors whatever state the queue reports for the root job (`waiting`,
/// `waiting-children`, `delayed`, …); those land in `Reported`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Active,
    Completed,
    Failed,
    Reported(String),
}

impl WorkflowStatus {
    /// Completed and failed records are never re-queried against the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active      => write!(f, "active"),
            Self::Completed   => write!(f, "completed"),
            Self::Failed      => write!(f, "failed"),
            Self::Reported(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for WorkflowStatus {
    fn from(s: &str) -> Self {
        match s {
            "active"    => Self::Active,
            "completed" => Self::Completed,
            "failed"    => Self::Failed,
            other       => Self::Reported(other.to_owned()),
        }
    }
}

/// A persisted workflow row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    /// Queue-assigned id of the outermost job of the chain.
    pub root_job_id: String,
    pub queue_name: String,
    pub status: String,
    /// The original, uncompiled task list.
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    pub fn status(&self) -> WorkflowStatus {
        WorkflowStatus::from(self.status.as_str())
    }
}

/// Values for inserting a new workflow row; timestamps are set by the store.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub id: Uuid,
    pub root_job_id: String,
    pub queue_name: String,
    pub status: WorkflowStatus,
    pub definition: serde_json::Value,
}
