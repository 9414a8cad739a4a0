//! Token-bucket admission control.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// Admits at most `capacity` jobs per `interval`; the budget is restored in
/// full once the interval has elapsed.
pub struct TokenBucket {
    capacity: u32,
    interval: Duration,
    state: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(capacity: u32, interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            interval,
            state: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.state.lock().await;
                let elapsed = bucket.last_refill.elapsed();
                if elapsed >= self.interval {
                    bucket.tokens = self.capacity;
                    bucket.last_refill = Instant::now();
                }
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    return;
                }
                self.interval.saturating_sub(elapsed)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens left in the current interval.
    pub async fn available(&self) -> u32 {
        self.state.lock().await.tokens
    }
}
