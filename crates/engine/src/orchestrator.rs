//! Workflow orchestrator: submission, read-time reconciliation and
//! event-driven status tracking.
//!
//! A workflow is one compiled chain in the queue plus one record in the
//! store. The record is the only thing the orchestrator owns; the queue is
//! the source of truth for progress, and a record whose root job the queue no
//! longer knows about is treated as expired and deleted on the next read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use db::{NewWorkflow, WorkflowRow, WorkflowStatus, WorkflowStore};
use queue::{JobQueue, QueueEvent};

use crate::linearize::{compile_chain, topological_sort};
use crate::templates::build_template;
use crate::{validate_graph, EngineError, QueueRouting, TaskDefinition};

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Handle returned to the caller after a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedWorkflow {
    pub workflow_id: Uuid,
    pub root_job_id: String,
    /// Name of the root job, i.e. the last step of the chain.
    pub name: String,
    pub queue_name: String,
}

/// One step of a workflow as the queue currently sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub job_id: String,
    pub job_name: String,
    pub status: String,
}

/// Reconciled state of a workflow; `steps` are in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowView {
    pub id: Uuid,
    pub root_job_id: String,
    pub queue_name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub steps: Vec<StepStatus>,
}

impl WorkflowView {
    fn new(row: WorkflowRow, steps: Vec<StepStatus>) -> Self {
        Self {
            id: row.id,
            root_job_id: row.root_job_id,
            queue_name: row.queue_name,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            steps,
        }
    }
}

enum Reconciled {
    Live(WorkflowRow, Vec<StepStatus>),
    Expired(String),
}

// ---------------------------------------------------------------------------
// Status tracking
// ---------------------------------------------------------------------------

/// Store access shared by `query` and the event listeners. All status writes
/// for one record id go through that id's lock.
#[derive(Clone)]
struct StatusTracker {
    store: Arc<dyn WorkflowStore>,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

/// Holds a record id's lock entry; the entry leaves the table when the last
/// holder drops it.
struct IdLock<'a> {
    locks: &'a DashMap<Uuid, Arc<Mutex<()>>>,
    id: Uuid,
    mutex: Arc<Mutex<()>>,
}

impl Drop for IdLock<'_> {
    fn drop(&mut self) {
        // Two references left: the table's and ours.
        self.locks.remove_if(&self.id, |_, held| {
            Arc::ptr_eq(held, &self.mutex) && Arc::strong_count(held) == 2
        });
    }
}

impl StatusTracker {
    fn lock_for(&self, id: Uuid) -> IdLock<'_> {
        let mutex = Arc::clone(self.locks.entry(id).or_default().value());
        IdLock { locks: &self.locks, id, mutex }
    }

    /// Apply a queue event to the record whose root job it concerns.
    /// Events for other jobs are ignored. Errors are logged, never returned.
    async fn handle_event(&self, queue_name: &str, event: QueueEvent) {
        let (job_id, status, reason) = match event {
            QueueEvent::Completed { job_id } => (job_id, WorkflowStatus::Completed, None),
            QueueEvent::Failed { job_id, reason } => (job_id, WorkflowStatus::Failed, Some(reason)),
        };

        let record = match self.store.find_by_root_job(queue_name, &job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                error!("status lookup for job {} on '{}' failed: {}", job_id, queue_name, e);
                return;
            }
        };

        let entry = self.lock_for(record.id);
        let _guard = entry.mutex.lock().await;

        // The record may have been deleted while we waited for the lock.
        match self.store.get(record.id).await {
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(e) => {
                error!("failed to reload workflow {}: {}", record.id, e);
                return;
            }
        }

        match self.store.update_status(record.id, &status.to_string()).await {
            Ok(()) => info!(
                workflow_id = %record.id,
                status = %status,
                reason = reason.as_deref().unwrap_or(""),
                "workflow status updated"
            ),
            Err(e) => error!("failed to update status of workflow {}: {}", record.id, e),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowOrchestrator
// ---------------------------------------------------------------------------

/// Entry point for submitting and querying workflows.
///
/// Construct one per process and share it behind an `Arc`.
pub struct WorkflowOrchestrator {
    queue: Arc<dyn JobQueue>,
    routing: QueueRouting,
    tracker: StatusTracker,
    listeners: DashMap<String, JoinHandle<()>>,
}

impl WorkflowOrchestrator {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn WorkflowStore>, routing: QueueRouting) -> Self {
        Self {
            queue,
            routing,
            tracker: StatusTracker {
                store,
                locks: Arc::new(DashMap::new()),
            },
            listeners: DashMap::new(),
        }
    }

    pub fn routing(&self) -> &QueueRouting {
        &self.routing
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Validate, compile and submit a task graph, then persist its record
    /// with status `active`.
    ///
    /// # Errors
    /// Validation errors are returned before anything reaches the queue or
    /// the store. Queue and store errors are passed through.
    #[instrument(skip(self, tasks), fields(tasks = tasks.len()))]
    pub async fn submit(&self, tasks: Vec<TaskDefinition>) -> Result<SubmittedWorkflow, EngineError> {
        validate_graph(&tasks)?;

        let workflow_id = Uuid::new_v4();
        let order = topological_sort(&tasks)?;
        let chain = compile_chain(&order, workflow_id, &self.routing)?;
        let definition = serde_json::to_value(&tasks)?;
        debug!(
            "compiled {} into chain of {} jobs",
            workflow_id,
            chain.job_count()
        );

        self.ensure_listeners();
        self.listen(&chain.queue_name);

        let added = self.queue.add_flow(chain).await?;
        self.tracker
            .store
            .insert(NewWorkflow {
                id: workflow_id,
                root_job_id: added.job_id.clone(),
                queue_name: added.queue_name.clone(),
                status: WorkflowStatus::Active,
                definition,
            })
            .await?;

        info!(
            "workflow {} submitted: root job {} on '{}'",
            workflow_id, added.job_id, added.queue_name
        );
        Ok(SubmittedWorkflow {
            workflow_id,
            root_job_id: added.job_id,
            name: added.name,
            queue_name: added.queue_name,
        })
    }

    /// Build a named template with `params` and submit it.
    pub async fn submit_template(
        &self,
        name: &str,
        params: &Value,
    ) -> Result<SubmittedWorkflow, EngineError> {
        let tasks = build_template(name, params)?;
        self.submit(tasks).await
    }

    // -----------------------------------------------------------------------
    // Query
    // -----------------------------------------------------------------------

    /// Read a workflow and reconcile it with the queue.
    ///
    /// Returns `Ok(None)` when the record does not exist or has expired; an
    /// expired record is deleted before returning.
    ///
    /// # Errors
    /// Store errors only. Queue errors count as expiry.
    #[instrument(skip(self))]
    pub async fn query(&self, id: Uuid) -> Result<Option<WorkflowView>, EngineError> {
        let entry = self.tracker.lock_for(id);
        let _guard = entry.mutex.lock().await;

        let Some(record) = self.tracker.store.get(id).await? else {
            return Ok(None);
        };

        match self.reconcile(record).await? {
            Reconciled::Live(record, steps) => Ok(Some(WorkflowView::new(record, steps))),
            Reconciled::Expired(reason) => {
                info!("workflow {} expired ({}), deleting record", id, reason);
                match self.tracker.store.delete(id).await {
                    Ok(()) | Err(db::DbError::NotFound) => {}
                    Err(e) => return Err(e.into()),
                }
                Ok(None)
            }
        }
    }

    async fn reconcile(&self, mut record: WorkflowRow) -> Result<Reconciled, EngineError> {
        let store = &self.tracker.store;

        if !record.status().is_terminal() {
            let state = match self.queue.job_state(&record.queue_name, &record.root_job_id).await {
                Ok(Some(state)) => state,
                Ok(None) => {
                    return Ok(Reconciled::Expired(format!(
                        "root job {} not found in queue",
                        record.root_job_id
                    )))
                }
                Err(e) => return Ok(Reconciled::Expired(e.to_string())),
            };
            if state.as_str() != record.status {
                store.update_status(record.id, state.as_str()).await?;
                record = store.get(record.id).await?.unwrap_or(WorkflowRow {
                    status: state.as_str().to_owned(),
                    ..record
                });
            }
        }

        let tree = match self.queue.get_flow(&record.queue_name, &record.root_job_id).await {
            Ok(Some(tree)) => tree,
            Ok(None) => return Ok(Reconciled::Expired("flow structure not found".to_owned())),
            Err(e) => return Ok(Reconciled::Expired(e.to_string())),
        };
        let steps = tree
            .post_order()
            .into_iter()
            .map(|job| StepStatus {
                job_id: job.id.clone(),
                job_name: job.name.clone(),
                status: job.state.to_string(),
            })
            .collect();

        Ok(Reconciled::Live(record, steps))
    }

    // -----------------------------------------------------------------------
    // Event listeners
    // -----------------------------------------------------------------------

    /// Subscribe to completion/failure events of every routed queue.
    /// Idempotent: each queue gets exactly one listener task.
    pub fn ensure_listeners(&self) {
        for queue_name in self.routing.queue_names() {
            self.listen(&queue_name);
        }
    }

    /// Number of queues currently listened to.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Number of record ids with a live lock entry.
    #[cfg(test)]
    pub(crate) fn lock_count(&self) -> usize {
        self.tracker.locks.len()
    }

    fn listen(&self, queue_name: &str) {
        if self.listeners.contains_key(queue_name) {
            return;
        }
        self.listeners
            .entry(queue_name.to_owned())
            .or_insert_with(|| {
                // Subscribe before spawning so no event after this call is missed.
                let events = self.queue.subscribe(queue_name);
                let tracker = self.tracker.clone();
                let name = queue_name.to_owned();
                debug!("listening for events on '{}'", name);
                tokio::spawn(run_listener(tracker, name, events))
            });
    }
}

impl Drop for WorkflowOrchestrator {
    fn drop(&mut self) {
        for entry in self.listeners.iter() {
            entry.value().abort();
        }
    }
}

async fn run_listener(
    tracker: StatusTracker,
    queue_name: String,
    mut events: broadcast::Receiver<QueueEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => tracker.handle_event(&queue_name, event).await,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("listener on '{}' lagged, {} events missed", queue_name, missed);
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("event stream for '{}' closed", queue_name);
                break;
            }
        }
    }
}
