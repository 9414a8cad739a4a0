//! The result envelope every handler returns and every downstream step reads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output of a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// When set, dependents are expected to short-circuit.
    #[serde(default)]
    pub skip_next_step: bool,
    /// Handler-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl WorkflowResult {
    /// A normal result; dependents should do their work.
    pub fn proceed(data: Value) -> Self {
        Self {
            skip_next_step: false,
            data,
        }
    }

    /// A skip result carrying a neutral payload.
    pub fn skip(data: Value) -> Self {
        Self {
            skip_next_step: true,
            data,
        }
    }
}

/// The filtered view a handler receives: declared father name → its result.
pub type ChildrenValues = BTreeMap<String, WorkflowResult>;

/// `true` if any visible father asked its dependents to skip.
///
/// Handlers that see `true` should return [`WorkflowResult::skip`] instead of
/// doing their normal work, which carries the skip along the declared
/// dependency subgraph only.
pub fn should_skip(children: &ChildrenValues) -> bool {
    children.values().any(|r| r.skip_next_step)
}

/// First visible father result whose `data` satisfies `accept`.
///
/// Fathers are scanned in name order.
pub fn extract_upstream<'a, F>(children: &'a ChildrenValues, accept: F) -> Option<&'a Value>
where
    F: Fn(&Value) -> bool,
{
    children.values().map(|r| &r.data).find(|data| accept(data))
}
