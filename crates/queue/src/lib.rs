//! `queue` crate — the tree-shaped job-execution substrate.
//!
//! The substrate only understands parent/children trees: a parent job becomes
//! runnable once every child has completed, and a job can read the return
//! values of its own children. The engine talks to it exclusively through
//! [`JobQueue`] and [`JobProcessor`]; [`InMemoryQueue`] is the in-process
//! implementation with per-queue workers, concurrency limits, token-bucket
//! admission, retries, completion/failure events and retention.

pub mod error;
pub mod events;
pub mod flow;
pub mod memory;
pub mod rate_limit;
pub mod settings;
pub mod traits;

pub use error::{JobError, QueueError};
pub use events::QueueEvent;
pub use flow::{AddedFlow, FlowJob, Job, JobOptions, JobSnapshot, JobState, JobTree};
pub use memory::InMemoryQueue;
pub use settings::QueueSettings;
pub use traits::{JobProcessor, JobQueue};
