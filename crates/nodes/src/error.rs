//! Handler-level error type.

use thiserror::Error;

/// Errors returned by a handler's `handle` method.
///
/// The substrate uses the variant to decide retry behaviour:
/// - `Retryable` — the job is re-run with exponential back-off.
/// - `Fatal`     — the job fails immediately, retries are skipped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Transient failure; the substrate should re-try the job.
    #[error("retryable handler error: {0}")]
    Retryable(String),

    /// Permanent failure (malformed upstream data, missing upstream result,
    /// unregistered handler key); no retry should be attempted.
    #[error("fatal handler error: {0}")]
    Fatal(String),
}

impl NodeError {
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }
}
