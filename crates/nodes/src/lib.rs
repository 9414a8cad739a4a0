//! `nodes` crate — the `TaskHandler` trait, the result envelope every handler
//! returns, and the registry the engine dispatches through.
//!
//! Every handler — built-in and external alike — must implement [`TaskHandler`].
//! The engine resolves handlers by key (`"<type>"` or `"<type>:<target>"`)
//! through a [`HandlerRegistry`] built once at process start.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod registry;
pub mod result;
pub mod traits;

pub use error::NodeError;
pub use registry::{handler_key, HandlerRegistry};
pub use result::{extract_upstream, should_skip, ChildrenValues, WorkflowResult};
pub use traits::{ExecutionContext, TaskHandler};
