//! Static task-type → queue lookup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::TaskDefinition;

/// Decides which queue a compiled step runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueRouting {
    /// Task type → queue name.
    pub queues: BTreeMap<String, String>,
    /// Queue for types with no entry.
    pub default_queue: String,
}

impl Default for QueueRouting {
    fn default() -> Self {
        let queues = [("save", "queue-save"), ("llm", "queue-ai"), ("update", "queue-update")]
            .into_iter()
            .map(|(t, q)| (t.to_owned(), q.to_owned()))
            .collect();
        Self {
            queues,
            default_queue: "default".to_owned(),
        }
    }
}

impl QueueRouting {
    /// Explicit `queue_name` first, then the type lookup, then the default.
    pub fn queue_for<'a>(&'a self, task: &'a TaskDefinition) -> &'a str {
        task.queue_name
            .as_deref()
            .or_else(|| self.queues.get(&task.task_type).map(String::as_str))
            .unwrap_or(self.default_queue.as_str())
    }

    /// Every queue this routing can send work to, default included.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.values().cloned().collect();
        names.push(self.default_queue.clone());
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_types_route_to_their_queues() {
        let routing = QueueRouting::default();
        assert_eq!(routing.queue_for(&TaskDefinition::new("s", "save")), "queue-save");
        assert_eq!(routing.queue_for(&TaskDefinition::new("l", "llm")), "queue-ai");
        assert_eq!(routing.queue_for(&TaskDefinition::new("u", "update")), "queue-update");
        assert_eq!(routing.queue_for(&TaskDefinition::new("x", "other")), "default");
    }

    #[test]
    fn explicit_queue_wins() {
        let routing = QueueRouting::default();
        let mut task = TaskDefinition::new("s", "save");
        task.queue_name = Some("priority".into());
        assert_eq!(routing.queue_for(&task), "priority");
    }

    #[test]
    fn queue_names_are_unique_and_include_default() {
        let names = QueueRouting::default().queue_names();
        assert_eq!(names, vec!["default", "queue-ai", "queue-save", "queue-update"]);
    }
}
