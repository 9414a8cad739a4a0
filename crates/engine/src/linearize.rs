//! Topological compilation of a validated task graph into a queue chain.
//!
//! The queue only models single-parent trees where children run before their
//! parent, so the graph is flattened into one total order and folded into a
//! chain: the first task becomes the innermost leaf, each later task wraps the
//! previous one as its only child, and the last task is the root job. Branches
//! that could run in parallel still run one after another.

use std::collections::{HashMap, VecDeque};

use queue::{FlowJob, JobOptions};
use uuid::Uuid;

use crate::models::StepData;
use crate::{EngineError, QueueRouting, TaskDefinition};

/// Order tasks so that every task comes after all of its fathers.
///
/// Kahn's algorithm with a FIFO ready queue. Ties are broken by input order:
/// tasks that are ready at the same time are emitted in the order they were
/// given, so the same input always compiles to the same chain.
///
/// # Errors
/// [`EngineError::CycleDetected`] if not every task could be ordered. Only
/// reachable when [`validate_graph`](crate::validate_graph) was skipped.
pub fn topological_sort(tasks: &[TaskDefinition]) -> Result<Vec<&TaskDefinition>, EngineError> {
    // Index every task by its position so iteration follows input order.
    let index: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    let mut in_degree: Vec<usize> = vec![0; tasks.len()];

    for (i, task) in tasks.iter().enumerate() {
        for father in &task.fathers {
            if let Some(&f) = index.get(father.as_str()) {
                dependents[f].push(i);
                in_degree[i] += 1;
            }
        }
    }

    // Seed the queue with tasks that have no fathers.
    let mut ready: VecDeque<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted: Vec<&TaskDefinition> = Vec::with_capacity(tasks.len());

    while let Some(i) = ready.pop_front() {
        sorted.push(&tasks[i]);
        for &d in &dependents[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                ready.push_back(d);
            }
        }
    }

    if sorted.len() != tasks.len() {
        let stuck = tasks
            .iter()
            .enumerate()
            .find(|(i, _)| in_degree[*i] > 0)
            .map(|(_, t)| t.name.clone())
            .unwrap_or_default();
        return Err(EngineError::CycleDetected(stuck));
    }

    Ok(sorted)
}

/// Fold an execution order into a nested chain.
///
/// Every node keeps its task's `fathers`, type, `track` flag, name and the
/// workflow id in its job data, and is routed with `routing`. Failure of any
/// step fails every step wrapped around it, up to the root job.
///
/// # Errors
/// [`EngineError::EmptyWorkflow`] for an empty order.
pub fn compile_chain(
    order: &[&TaskDefinition],
    workflow_id: Uuid,
    routing: &QueueRouting,
) -> Result<FlowJob, EngineError> {
    let mut chain: Option<FlowJob> = None;

    for task in order {
        let data = serde_json::to_value(StepData::from_task(task, workflow_id))?;
        chain = Some(FlowJob {
            name: task.name.clone(),
            queue_name: routing.queue_for(task).to_owned(),
            data,
            opts: JobOptions {
                fail_parent_on_failure: true,
                attempts: None,
            },
            children: chain.into_iter().collect(),
        });
    }

    chain.ok_or(EngineError::EmptyWorkflow)
}

/// Names along a compiled chain in execution order (innermost first).
pub fn execution_order(chain: &FlowJob) -> Vec<&str> {
    let mut names = Vec::new();
    let mut node = Some(chain);
    while let Some(job) = node {
        names.push(job.name.as_str());
        node = job.children.first();
    }
    names.reverse();
    names
}
