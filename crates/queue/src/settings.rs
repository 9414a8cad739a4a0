//! Per-queue tuning knobs.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits for one named queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Jobs of this queue allowed to run at the same time.
    pub concurrency_limit: usize,
    /// Token bucket size: jobs admitted per regeneration interval.
    pub max_request_token: u32,
    /// Interval after which the bucket is refilled.
    pub regeneration_interval_ms: u64,
    /// Cap on waiting jobs; further submissions are rejected.
    pub max_queue_length: usize,
    /// Attempts before a retryable failure becomes final.
    pub max_attempts: u32,
    /// Base delay for exponential back-off between attempts.
    pub backoff_base_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: 2,
            max_request_token: 20,
            regeneration_interval_ms: 1000,
            max_queue_length: 1000,
            max_attempts: 3,
            backoff_base_ms: 100,
        }
    }
}

/// Longest delay between two attempts of a job.
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

impl QueueSettings {
    pub fn regeneration_interval(&self) -> Duration {
        Duration::from_millis(self.regeneration_interval_ms)
    }

    /// Delay before attempt `attempts_made + 1`, capped at [`MAX_BACKOFF`].
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts_made.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms)
            .saturating_mul(factor)
            .min(MAX_BACKOFF)
    }

    /// Defaults for the stock queues: save, ai, update, and the fallback queue.
    pub fn defaults() -> BTreeMap<String, QueueSettings> {
        let mut queues = BTreeMap::new();
        queues.insert("queue-save".to_owned(), QueueSettings::default());
        queues.insert(
            "queue-ai".to_owned(),
            QueueSettings {
                concurrency_limit: 10,
                max_request_token: 50,
                max_queue_length: 2000,
                ..QueueSettings::default()
            },
        );
        queues.insert("queue-update".to_owned(), QueueSettings::default());
        queues.insert("default".to_owned(), QueueSettings::default());
        queues
    }
}
