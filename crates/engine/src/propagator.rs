//! Ancestor propagation: restores per-step visibility on top of the linear chain.
//!
//! A compiled chain gives every step exactly one child, so the queue only ever
//! hands a step the return value of the step right before it. Each step
//! therefore returns a [`StepEnvelope`] that carries every earlier result
//! forward, and before a handler runs the accumulated map is narrowed to the
//! step's declared `fathers`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use nodes::{handler_key, ChildrenValues, ExecutionContext, HandlerRegistry, NodeError, WorkflowResult};
use queue::{Job, JobError, JobProcessor};

use crate::models::StepData;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// What every compiled step returns to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEnvelope {
    /// Name of the step that produced `result`.
    pub name: String,
    pub result: WorkflowResult,
    /// Results of every step executed so far in this chain, `name` included.
    pub ancestors: BTreeMap<String, WorkflowResult>,
}

// ---------------------------------------------------------------------------
// AncestorMap
// ---------------------------------------------------------------------------

/// Name-keyed results of the steps that already ran in a chain.
///
/// Append-only: a step never removes or rewrites an earlier entry, it only
/// returns a new map with its own result added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AncestorMap(BTreeMap<String, WorkflowResult>);

impl AncestorMap {
    /// Merge the envelopes found in a job's children values.
    ///
    /// Values that are not envelopes are skipped with a warning.
    pub fn from_children_values(values: &BTreeMap<String, Value>) -> Self {
        let mut map = BTreeMap::new();
        for (child, value) in values {
            match serde_json::from_value::<StepEnvelope>(value.clone()) {
                Ok(envelope) => {
                    map.insert(envelope.name, envelope.result);
                    map.extend(envelope.ancestors);
                }
                Err(e) => warn!("ignoring child value {} that is not a step envelope: {}", child, e),
            }
        }
        Self(map)
    }

    /// A copy of this map with `name` recorded.
    pub fn with(&self, name: &str, result: WorkflowResult) -> Self {
        let mut map = self.0.clone();
        map.insert(name.to_owned(), result);
        Self(map)
    }

    /// Results of `fathers` only. Fathers that never produced a result are
    /// left out, and no fathers means nothing is visible.
    pub fn visible_to(&self, fathers: &[String]) -> ChildrenValues {
        fathers
            .iter()
            .filter_map(|f| self.0.get(f).map(|r| (f.clone(), r.clone())))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowResult> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, WorkflowResult> {
        self.0
    }
}

// ---------------------------------------------------------------------------
// AncestorPropagator
// ---------------------------------------------------------------------------

/// The [`JobProcessor`] every workflow queue runs with.
pub struct AncestorPropagator {
    registry: Arc<HandlerRegistry>,
}

impl AncestorPropagator {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }
}

/// Retryable handler errors go through the queue's retry policy, fatal ones
/// fail the step at once.
fn job_error(err: NodeError) -> JobError {
    match err {
        NodeError::Retryable(msg) => JobError::Retryable(msg),
        NodeError::Fatal(msg) => JobError::Unrecoverable(msg),
    }
}

#[async_trait]
impl JobProcessor for AncestorPropagator {
    #[instrument(skip(self, job), fields(job_id = %job.id, step = %job.name))]
    async fn process(&self, job: Job) -> Result<Value, JobError> {
        let step: StepData = serde_json::from_value(job.data.clone())
            .map_err(|e| JobError::Unrecoverable(format!("malformed step data: {e}")))?;

        let key = handler_key(&step.task_type, &step.payload);
        let handler = self.registry.resolve(&key).map_err(job_error)?;

        let ancestors = AncestorMap::from_children_values(&job.children_values);
        let visible = ancestors.visible_to(&step.fathers);
        debug!(
            "dispatching to '{}' with {} of {} ancestors visible",
            key,
            visible.len(),
            ancestors.len()
        );

        let ctx = ExecutionContext {
            workflow_id: step.workflow_id,
            job_id: job.id.clone(),
            task_name: step.task_name.clone(),
            task_type: step.task_type.clone(),
            track: step.track,
            payload: step.payload.clone(),
        };
        let result = handler.handle(&ctx, &visible).await.map_err(job_error)?;

        let envelope = StepEnvelope {
            name: step.task_name.clone(),
            ancestors: ancestors.with(&step.task_name, result.clone()).into_inner(),
            result,
        };
        serde_json::to_value(envelope)
            .map_err(|e| JobError::Unrecoverable(format!("unserializable step result: {e}")))
    }
}
