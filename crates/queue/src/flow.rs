//! Flow trees: what gets submitted, what a worker sees, and what can be read back.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Per-job options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// When this job fails for good, fail its parent too (and so on upward).
    #[serde(default)]
    pub fail_parent_on_failure: bool,
    /// Overrides the queue's `max_attempts`.
    #[serde(default)]
    pub attempts: Option<u32>,
}

/// A job to submit together with the children that must complete before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowJob {
    pub name: String,
    pub queue_name: String,
    pub data: Value,
    #[serde(default)]
    pub opts: JobOptions,
    #[serde(default)]
    pub children: Vec<FlowJob>,
}

impl FlowJob {
    /// Number of jobs in this tree.
    pub fn job_count(&self) -> usize {
        1 + self.children.iter().map(FlowJob::job_count).sum::<usize>()
    }
}

/// Handle to the root job of a submitted flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedFlow {
    pub job_id: String,
    pub name: String,
    pub queue_name: String,
}

// ---------------------------------------------------------------------------
// Job state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Ready to run, waiting for a worker slot.
    Waiting,
    /// Blocked until every child has completed.
    WaitingChildren,
    Active,
    /// Backing off before a retry.
    Delayed,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::WaitingChildren => "waiting-children",
            Self::Active => "active",
            Self::Delayed => "delayed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting"          => Ok(Self::Waiting),
            "waiting-children" => Ok(Self::WaitingChildren),
            "active"           => Ok(Self::Active),
            "delayed"          => Ok(Self::Delayed),
            "completed"        => Ok(Self::Completed),
            "failed"           => Ok(Self::Failed),
            other              => Err(format!("unknown job state: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker view
// ---------------------------------------------------------------------------

/// A job handed to a [`JobProcessor`](crate::JobProcessor).
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub queue_name: String,
    pub data: Value,
    /// Attempts including the current one.
    pub attempts_made: u32,
    /// Return values of this job's direct children, keyed `"<queue>:<job id>"`.
    /// Read from the queue before the processor is invoked.
    pub children_values: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Read-back
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub name: String,
    pub queue_name: String,
    pub state: JobState,
    pub failed_reason: Option<String>,
}

/// Execution tree of a flow as currently known to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTree {
    pub job: JobSnapshot,
    pub children: Vec<JobTree>,
}

impl JobTree {
    /// Flatten the tree with children before the node that wraps them, which
    /// is the order the queue runs them in.
    pub fn post_order(&self) -> Vec<&JobSnapshot> {
        let mut out = Vec::new();
        self.collect_post_order(&mut out);
        out
    }

    fn collect_post_order<'a>(&'a self, out: &mut Vec<&'a JobSnapshot>) {
        for child in &self.children {
            child.collect_post_order(out);
        }
        out.push(&self.job);
    }
}
