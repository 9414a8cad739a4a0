//! End-to-end tests for the orchestrator running on the in-memory queue and
//! store, with `MockHandler`s standing in for real step handlers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use db::{MemoryWorkflowStore, NewWorkflow, WorkflowStatus, WorkflowStore};
use nodes::builtin::PassthroughHandler;
use nodes::mock::MockHandler;
use nodes::HandlerRegistry;
use queue::{AddedFlow, FlowJob, InMemoryQueue, JobState, JobTree, QueueError, QueueEvent};

use crate::{
    AncestorPropagator, EngineError, QueueRouting, TaskDefinition, WorkflowOrchestrator,
};

struct Harness {
    queue: Arc<InMemoryQueue>,
    store: Arc<MemoryWorkflowStore>,
    orchestrator: WorkflowOrchestrator,
}

fn harness(registry: HandlerRegistry, with_workers: bool) -> Harness {
    let queue = Arc::new(InMemoryQueue::new(BTreeMap::new()));
    let store = Arc::new(MemoryWorkflowStore::new());
    let routing = QueueRouting::default();

    if with_workers {
        let propagator = Arc::new(AncestorPropagator::new(Arc::new(registry)));
        for name in routing.queue_names() {
            queue
                .run_worker(&name, propagator.clone())
                .expect("one worker per queue");
        }
    }

    let orchestrator = WorkflowOrchestrator::new(queue.clone(), store.clone(), routing);
    Harness { queue, store, orchestrator }
}

fn task(name: &str, task_type: &str, target: &str, fathers: &[&str]) -> TaskDefinition {
    TaskDefinition::new(name, task_type)
        .with_fathers(fathers.iter().copied())
        .with_payload(json!({ "target": target }))
}

/// save → {summary, censor}; summary → embed.
fn article_graph() -> Vec<TaskDefinition> {
    vec![
        TaskDefinition::new("save", "save"),
        task("summary", "llm", "summary", &["save"]),
        task("censor", "llm", "censor", &["save"]),
        task("embed", "llm", "embed", &["summary"]),
    ]
}

async fn wait_for_status(store: &MemoryWorkflowStore, id: Uuid, want: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(row) = store.get(id).await.unwrap() {
                if row.status == want {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("workflow {id} never reached '{want}'"));
}

// ============================================================
// Submission
// ============================================================

#[tokio::test]
async fn diamond_runs_as_a_chain_and_each_step_sees_only_its_fathers() {
    let embed = Arc::new(MockHandler::returning("llm:embed", json!({ "vector": [1, 2] })));
    let registry = HandlerRegistry::new()
        .with(Arc::new(MockHandler::returning("save", json!({ "id": 1 }))))
        .with(Arc::new(MockHandler::returning("llm:summary", json!({ "text": "short" }))))
        .with(Arc::new(MockHandler::returning("llm:censor", json!({ "clean": true }))))
        .with(embed.clone());
    let h = harness(registry, true);

    let submitted = h.orchestrator.submit(article_graph()).await.unwrap();
    assert_eq!(submitted.name, "embed");
    assert_eq!(submitted.queue_name, "queue-ai");

    wait_for_status(&h.store, submitted.workflow_id, "completed").await;

    let seen = embed.last_children().expect("embed ran");
    assert_eq!(seen.keys().collect::<Vec<_>>(), vec!["summary"]);
    assert_eq!(seen["summary"].data["text"], "short");

    let view = h.orchestrator.query(submitted.workflow_id).await.unwrap().unwrap();
    assert_eq!(view.status, "completed");
    assert_eq!(view.root_job_id, submitted.root_job_id);
    let steps: Vec<(&str, &str)> = view
        .steps
        .iter()
        .map(|s| (s.job_name.as_str(), s.status.as_str()))
        .collect();
    assert_eq!(
        steps,
        vec![
            ("save", "completed"),
            ("summary", "completed"),
            ("censor", "completed"),
            ("embed", "completed"),
        ]
    );
}

#[tokio::test]
async fn record_keeps_the_uncompiled_definition() {
    let h = harness(HandlerRegistry::new(), false);
    let submitted = h.orchestrator.submit(article_graph()).await.unwrap();

    let row = h.store.get(submitted.workflow_id).await.unwrap().unwrap();
    assert_eq!(row.status().to_string(), "active");
    let stored: Vec<TaskDefinition> = serde_json::from_value(row.definition).unwrap();
    assert_eq!(stored, article_graph());
}

#[tokio::test]
async fn invalid_graphs_touch_neither_queue_nor_store() {
    let h = harness(HandlerRegistry::new(), false);
    let cases = vec![
        vec![],
        vec![TaskDefinition::new("a", "save"), TaskDefinition::new("a", "save")],
        vec![TaskDefinition::new("a", "save").with_fathers(["ghost"])],
        vec![
            TaskDefinition::new("a", "save").with_fathers(["b"]),
            TaskDefinition::new("b", "save").with_fathers(["a"]),
        ],
    ];
    for tasks in cases {
        let err = h.orchestrator.submit(tasks).await.unwrap_err();
        assert!(err.is_validation(), "{err} should be a validation error");
    }
    assert!(h.store.is_empty());
    assert_eq!(h.queue.job_count(), 0);
    assert_eq!(h.orchestrator.listener_count(), 0);
}

#[tokio::test]
async fn template_runs_end_to_end() {
    let registry = HandlerRegistry::new()
        .with(Arc::new(PassthroughHandler::new("llm:censor")))
        .with(Arc::new(PassthroughHandler::new("update:censor")));
    let h = harness(registry, true);

    let submitted = h
        .orchestrator
        .submit_template("article-censor-pipeline", &json!({ "target_id": "a1" }))
        .await
        .unwrap();
    assert_eq!(submitted.name, "update-censor");
    wait_for_status(&h.store, submitted.workflow_id, "completed").await;

    let err = h
        .orchestrator
        .submit_template("article-censor-pipeline", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTemplateParams { .. }));
}

// ============================================================
// Status tracking
// ============================================================

#[tokio::test]
async fn failing_step_fails_the_workflow() {
    let registry = HandlerRegistry::new()
        .with(Arc::new(MockHandler::failing_fatal("save", "disk full")))
        .with(Arc::new(MockHandler::returning("llm:summary", json!({}))));
    let h = harness(registry, true);

    let submitted = h
        .orchestrator
        .submit(vec![
            TaskDefinition::new("save", "save"),
            task("summary", "llm", "summary", &["save"]),
        ])
        .await
        .unwrap();
    wait_for_status(&h.store, submitted.workflow_id, "failed").await;

    // Terminal records are not re-read from the queue.
    let view = h.orchestrator.query(submitted.workflow_id).await.unwrap().unwrap();
    assert_eq!(view.status, "failed");
    assert!(view.steps.iter().all(|s| s.status == "failed"));
}

#[tokio::test]
async fn retryable_step_eventually_completes() {
    let registry = HandlerRegistry::new().with(Arc::new(MockHandler::flaky(
        "save",
        1,
        json!({ "id": 1 }),
    )));
    let h = harness(registry, true);

    let submitted = h
        .orchestrator
        .submit(vec![TaskDefinition::new("save", "save")])
        .await
        .unwrap();
    wait_for_status(&h.store, submitted.workflow_id, "completed").await;
}

#[tokio::test]
async fn query_mirrors_queue_state_while_pending() {
    let h = harness(HandlerRegistry::new(), false);
    let submitted = h.orchestrator.submit(article_graph()).await.unwrap();

    let view = h.orchestrator.query(submitted.workflow_id).await.unwrap().unwrap();
    assert_eq!(view.status, JobState::WaitingChildren.as_str());
    assert_eq!(view.steps.len(), 4);
    assert_eq!(view.steps[0].job_name, "save");
    assert_eq!(view.steps[0].status, "waiting");

    let row = h.store.get(submitted.workflow_id).await.unwrap().unwrap();
    assert_eq!(row.status, "waiting-children");
}

#[tokio::test]
async fn listeners_start_once_per_routed_queue() {
    let h = harness(HandlerRegistry::new(), false);
    h.orchestrator.submit(article_graph()).await.unwrap();
    h.orchestrator.submit(article_graph()).await.unwrap();
    assert_eq!(
        h.orchestrator.listener_count(),
        QueueRouting::default().queue_names().len()
    );
}

// ============================================================
// Expiry
// ============================================================

#[tokio::test]
async fn evicted_root_job_expires_the_record() {
    let h = harness(HandlerRegistry::new(), false);
    let submitted = h.orchestrator.submit(article_graph()).await.unwrap();

    assert!(h.queue.remove(&submitted.queue_name, &submitted.root_job_id));
    assert!(h.orchestrator.query(submitted.workflow_id).await.unwrap().is_none());
    assert!(h.store.is_empty());

    // Second read is a plain miss.
    assert!(h.orchestrator.query(submitted.workflow_id).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let h = harness(HandlerRegistry::new(), false);
    assert!(h.orchestrator.query(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn lock_entries_do_not_outlive_their_holders() {
    let registry =
        HandlerRegistry::new().with(Arc::new(MockHandler::returning("save", json!({ "id": 1 }))));
    let h = harness(registry, true);

    for _ in 0..1000 {
        assert!(h.orchestrator.query(Uuid::new_v4()).await.unwrap().is_none());
    }
    assert_eq!(h.orchestrator.lock_count(), 0);

    let submitted = h
        .orchestrator
        .submit(vec![TaskDefinition::new("save", "save")])
        .await
        .unwrap();
    wait_for_status(&h.store, submitted.workflow_id, "completed").await;
    assert!(h.orchestrator.query(submitted.workflow_id).await.unwrap().is_some());

    // The listener drops its entry right after writing the status.
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.orchestrator.lock_count() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("lock table drains");
}

/// A queue whose backend cannot be reached.
struct UnreachableQueue;

#[async_trait]
impl queue::JobQueue for UnreachableQueue {
    async fn add_flow(&self, _flow: FlowJob) -> Result<AddedFlow, QueueError> {
        Err(QueueError::Unavailable("connection refused".into()))
    }

    async fn job_state(&self, _queue: &str, _id: &str) -> Result<Option<JobState>, QueueError> {
        Err(QueueError::Unavailable("connection refused".into()))
    }

    async fn get_flow(&self, _queue: &str, _id: &str) -> Result<Option<JobTree>, QueueError> {
        Err(QueueError::Unavailable("connection refused".into()))
    }

    fn subscribe(&self, _queue: &str) -> broadcast::Receiver<QueueEvent> {
        broadcast::channel(1).1
    }
}

#[tokio::test]
async fn queue_errors_count_as_expiry() {
    let store = Arc::new(MemoryWorkflowStore::new());
    let orchestrator =
        WorkflowOrchestrator::new(Arc::new(UnreachableQueue), store.clone(), QueueRouting::default());

    let row = store
        .insert(NewWorkflow {
            id: Uuid::new_v4(),
            root_job_id: "17".into(),
            queue_name: "queue-ai".into(),
            status: WorkflowStatus::Active,
            definition: Value::Null,
        })
        .await
        .unwrap();

    assert!(orchestrator.query(row.id).await.unwrap().is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn unreachable_queue_rejects_submission_without_a_record() {
    let store = Arc::new(MemoryWorkflowStore::new());
    let orchestrator =
        WorkflowOrchestrator::new(Arc::new(UnreachableQueue), store.clone(), QueueRouting::default());

    let err = orchestrator.submit(article_graph()).await.unwrap_err();
    assert!(matches!(err, EngineError::Queue(QueueError::Unavailable(_))));
    assert!(!err.is_validation());
    assert!(store.is_empty());
}
