//! Core domain models for the workflow engine.
//!
//! `TaskDefinition` is what clients submit and what is stored verbatim in the
//! `definition` column of the `workflow` table. `StepData` is what each
//! compiled job carries through the queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskDefinition
// ---------------------------------------------------------------------------

/// A single named step of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique identifier within this workflow (referenced by `fathers`).
    pub name: String,
    /// Steps that must run before this one and whose results it can see.
    #[serde(default)]
    pub fathers: Vec<String>,
    /// Routing discriminator, e.g. `save`, `llm`, `update`.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Whether the step's identity is externally significant.
    #[serde(default)]
    pub track: bool,
    /// Opaque data for the handler; a string `target` refines the handler key.
    #[serde(default)]
    pub payload: Value,
    /// Explicit queue; falls back to the type → queue lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,
}

impl TaskDefinition {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fathers: Vec::new(),
            task_type: task_type.into(),
            track: false,
            payload: Value::Null,
            queue_name: None,
        }
    }

    pub fn with_fathers<I, S>(mut self, fathers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fathers = fathers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn tracked(mut self) -> Self {
        self.track = true;
        self
    }
}

// ---------------------------------------------------------------------------
// StepData
// ---------------------------------------------------------------------------

/// Job data of one compiled step.
///
/// `fathers` is the only trace of the original graph shape that survives
/// linearization; the propagator filters ancestor results with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepData {
    pub workflow_id: Uuid,
    pub task_name: String,
    pub task_type: String,
    pub track: bool,
    pub fathers: Vec<String>,
    pub payload: Value,
}

impl StepData {
    pub fn from_task(task: &TaskDefinition, workflow_id: Uuid) -> Self {
        Self {
            workflow_id,
            task_name: task.name.clone(),
            task_type: task.task_type.clone(),
            track: task.track,
            fathers: task.fathers.clone(),
            payload: task.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn definition_accepts_minimal_json() {
        let task: TaskDefinition =
            serde_json::from_value(json!({ "name": "save", "type": "save" })).unwrap();
        assert!(task.fathers.is_empty());
        assert!(!task.track);
        assert_eq!(task.payload, Value::Null);
        assert_eq!(task.queue_name, None);
    }

    #[test]
    fn definition_serializes_type_field() {
        let task = TaskDefinition::new("summary", "llm").with_fathers(["save"]);
        let v = serde_json::to_value(&task).unwrap();
        assert_eq!(v["type"], "llm");
        assert_eq!(v["fathers"], json!(["save"]));
        assert!(v.get("queue_name").is_none());
    }
}
