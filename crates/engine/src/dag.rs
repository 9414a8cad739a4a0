//! Graph validation — run this before compiling or submitting a workflow.
//!
//! Rules enforced:
//! 1. The workflow has at least one task and every task has a name.
//! 2. Task names are unique within the workflow.
//! 3. Every `fathers` entry names a task of the same workflow.
//! 4. Following `fathers` never leads back to a task on the current path.
//!
//! Nothing is submitted or persisted until all four checks pass.

use std::collections::{HashMap, HashSet};

use crate::{EngineError, TaskDefinition};

/// Validate the structure of a task graph.
///
/// # Errors
/// - [`EngineError::EmptyWorkflow`] / [`EngineError::MissingName`] for degenerate input.
/// - [`EngineError::DuplicateName`] if two tasks share a name.
/// - [`EngineError::UnresolvedFather`] if a father is not in the set.
/// - [`EngineError::CycleDetected`] naming the task that closes a cycle.
pub fn validate_graph(tasks: &[TaskDefinition]) -> Result<(), EngineError> {
    if tasks.is_empty() {
        return Err(EngineError::EmptyWorkflow);
    }

    // -----------------------------------------------------------------------
    // 1. Names: present and unique
    // -----------------------------------------------------------------------
    let mut by_name: HashMap<&str, &TaskDefinition> = HashMap::with_capacity(tasks.len());
    for task in tasks {
        if task.name.trim().is_empty() {
            return Err(EngineError::MissingName);
        }
        if by_name.insert(task.name.as_str(), task).is_some() {
            return Err(EngineError::DuplicateName(task.name.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Every father resolves
    // -----------------------------------------------------------------------
    for task in tasks {
        for father in &task.fathers {
            if !by_name.contains_key(father.as_str()) {
                return Err(EngineError::UnresolvedFather {
                    task: task.name.clone(),
                    father: father.clone(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. Cycle detection (DFS with a recursion stack)
    // -----------------------------------------------------------------------
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_path: HashSet<&str> = HashSet::new();
    for task in tasks {
        if !visited.contains(task.name.as_str()) {
            visit(task.name.as_str(), &by_name, &mut visited, &mut on_path)?;
        }
    }

    Ok(())
}

fn visit<'a>(
    name: &'a str,
    by_name: &HashMap<&'a str, &'a TaskDefinition>,
    visited: &mut HashSet<&'a str>,
    on_path: &mut HashSet<&'a str>,
) -> Result<(), EngineError> {
    if on_path.contains(name) {
        return Err(EngineError::CycleDetected(name.to_owned()));
    }
    if !visited.insert(name) {
        return Ok(());
    }

    on_path.insert(name);
    if let Some(&task) = by_name.get(name) {
        for father in &task.fathers {
            visit(father.as_str(), by_name, visited, on_path)?;
        }
    }
    on_path.remove(name);

    Ok(())
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, fathers: &[&str]) -> TaskDefinition {
        TaskDefinition::new(name, "mock").with_fathers(fathers.iter().copied())
    }

    #[test]
    fn valid_diamond_passes() {
        //   save
        //  /    \
        // summary censor
        //  \    /
        //   embed
        let tasks = vec![
            task("save", &[]),
            task("summary", &["save"]),
            task("censor", &["save"]),
            task("embed", &["summary", "censor"]),
        ];
        validate_graph(&tasks).expect("diamond is a DAG");
    }

    #[test]
    fn single_task_without_fathers_is_valid() {
        validate_graph(&[task("solo", &[])]).expect("single task should be valid");
    }

    #[test]
    fn empty_workflow_is_rejected() {
        assert!(matches!(validate_graph(&[]), Err(EngineError::EmptyWorkflow)));
    }

    #[test]
    fn blank_name_is_rejected() {
        assert!(matches!(
            validate_graph(&[task("  ", &[])]),
            Err(EngineError::MissingName)
        ));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let tasks = vec![task("a", &[]), task("a", &[])];
        assert!(matches!(
            validate_graph(&tasks),
            Err(EngineError::DuplicateName(name)) if name == "a"
        ));
    }

    #[test]
    fn unknown_father_is_rejected() {
        let tasks = vec![task("a", &[]), task("b", &["ghost"])];
        assert!(matches!(
            validate_graph(&tasks),
            Err(EngineError::UnresolvedFather { task, father }) if task == "b" && father == "ghost"
        ));
    }

    #[test]
    fn two_node_cycle_is_detected() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        assert!(matches!(
            validate_graph(&tasks),
            Err(EngineError::CycleDetected(name)) if name == "a"
        ));
    }

    #[test]
    fn three_node_cycle_is_detected() {
        // a → c → b → a
        let tasks = vec![task("a", &["c"]), task("b", &["a"]), task("c", &["b"])];
        assert!(matches!(validate_graph(&tasks), Err(EngineError::CycleDetected(_))));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let tasks = vec![task("loop", &["loop"])];
        assert!(matches!(
            validate_graph(&tasks),
            Err(EngineError::CycleDetected(name)) if name == "loop"
        ));
    }

    #[test]
    fn shared_ancestor_is_not_a_cycle() {
        // Two paths reach 'root'; the second visit hits `visited`, not `on_path`.
        let tasks = vec![
            task("root", &[]),
            task("left", &["root"]),
            task("right", &["root", "left"]),
        ];
        validate_graph(&tasks).expect("converging paths are fine");
    }
}
