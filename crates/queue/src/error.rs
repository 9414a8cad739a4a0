//! Substrate error types.

use thiserror::Error;

/// Errors raised by the queue itself.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The target queue already holds `max_queue_length` waiting jobs.
    #[error("queue '{queue}' is full ({limit} waiting jobs)")]
    QueueFull { queue: String, limit: usize },

    /// `run_worker` was called twice for the same queue.
    #[error("a worker is already running for queue '{0}'")]
    WorkerAlreadyRunning(String),

    /// The substrate could not be reached.
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors a [`JobProcessor`](crate::JobProcessor) reports for one job.
///
/// The queue uses the variant to decide retry behaviour.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Eligible for the queue's retry policy.
    #[error("{0}")]
    Retryable(String),

    /// Fails the job immediately; remaining attempts are discarded.
    #[error("unrecoverable: {0}")]
    Unrecoverable(String),
}
