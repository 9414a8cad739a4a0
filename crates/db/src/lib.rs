//! `db` crate — pure persistence layer.
//!
//! Provides a connection pool, the workflow row struct, repository functions
//! for the `workflow` table, and the [`WorkflowStore`] seam the engine writes
//! through. No business logic lives here.

pub mod error;
pub mod models;
pub mod pool;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use models::{NewWorkflow, WorkflowRow, WorkflowStatus};
pub use pool::{DbPool, PoolSettings};
pub use store::{MemoryWorkflowStore, PgWorkflowStore, WorkflowStore};
