//! `engine` crate — task-graph validation, chain compilation, ancestor
//! propagation and the workflow orchestrator.
//!
//! Submission path: [`validate_graph`] → [`topological_sort`] →
//! [`compile_chain`] → [`WorkflowOrchestrator::submit`]. Execution path: the
//! queue runs the chain one step at a time and every step goes through the
//! [`AncestorPropagator`], which narrows the visible history to the step's
//! declared fathers.

pub mod dag;
pub mod error;
pub mod linearize;
pub mod models;
pub mod orchestrator;
pub mod propagator;
pub mod routing;
pub mod templates;

pub use dag::validate_graph;
pub use error::EngineError;
pub use linearize::{compile_chain, execution_order, topological_sort};
pub use models::{StepData, TaskDefinition};
pub use orchestrator::{StepStatus, SubmittedWorkflow, WorkflowOrchestrator, WorkflowView};
pub use propagator::{AncestorMap, AncestorPropagator, StepEnvelope};
pub use routing::QueueRouting;
pub use templates::{build_template, template_names};

#[cfg(test)]
mod orchestrator_tests;
