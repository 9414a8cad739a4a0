//! Seams between the engine and a job substrate.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{AddedFlow, FlowJob, Job, JobError, JobState, JobTree, QueueError, QueueEvent};

/// What the engine needs from a tree-shaped job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit a whole tree; children run before their parent.
    async fn add_flow(&self, flow: FlowJob) -> Result<AddedFlow, QueueError>;

    /// Current state of a job, `None` once it has been evicted.
    async fn job_state(&self, queue_name: &str, job_id: &str) -> Result<Option<JobState>, QueueError>;

    /// Execution tree rooted at `job_id`, `None` once it has been evicted.
    async fn get_flow(&self, queue_name: &str, job_id: &str) -> Result<Option<JobTree>, QueueError>;

    /// Completion/failure events for every job of `queue_name`.
    fn subscribe(&self, queue_name: &str) -> broadcast::Receiver<QueueEvent>;
}

/// Runs one job. Its `Ok` value becomes the job's return value, which the
/// parent job later reads through [`Job::children_values`].
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: Job) -> Result<Value, JobError>;
}
