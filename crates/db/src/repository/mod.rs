//! SQL for the `workflow` table, one function per statement.
//!
//! Queries are checked at runtime so the workspace builds without a live
//! database. [`PgWorkflowStore`](crate::PgWorkflowStore) is the only caller.

pub mod workflows;
