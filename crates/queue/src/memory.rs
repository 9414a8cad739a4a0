//! In-process flow queue.
//!
//! Jobs live in a single `DashMap` keyed by `(queue, id)`. Every named queue
//! has a ready channel drained by one worker loop, which admits jobs through
//! the queue's token bucket and runs them under its concurrency semaphore.
//! Shard guards are never held across an `.await` or while touching another
//! key.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::rate_limit::TokenBucket;
use crate::{
    AddedFlow, FlowJob, Job, JobError, JobOptions, JobProcessor, JobQueue, JobSnapshot, JobState,
    JobTree, QueueError, QueueEvent, QueueSettings,
};

const EVENT_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Internal records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct JobKey {
    queue: String,
    id: String,
}

impl JobKey {
    /// Key under which a parent sees this job's return value.
    fn child_key(&self) -> String {
        format!("{}:{}", self.queue, self.id)
    }
}

struct JobEntry {
    name: String,
    data: Value,
    opts: JobOptions,
    state: JobState,
    parent: Option<JobKey>,
    children: Vec<JobKey>,
    pending_children: usize,
    return_value: Option<Value>,
    failed_reason: Option<String>,
    attempts_made: u32,
    finished_at: Option<Instant>,
}

struct QueueHandle {
    name: String,
    settings: QueueSettings,
    ready_tx: mpsc::UnboundedSender<String>,
    ready_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    events: broadcast::Sender<QueueEvent>,
    limiter: TokenBucket,
    concurrency: Arc<Semaphore>,
    /// Jobs on this queue that have not reached a finished state.
    unfinished: AtomicUsize,
}

impl QueueHandle {
    fn new(name: &str, settings: QueueSettings) -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name: name.to_owned(),
            limiter: TokenBucket::new(settings.max_request_token, settings.regeneration_interval()),
            concurrency: Arc::new(Semaphore::new(settings.concurrency_limit.max(1))),
            settings,
            ready_tx,
            ready_rx: Mutex::new(Some(ready_rx)),
            events,
            unfinished: AtomicUsize::new(0),
        }
    }

    /// Claim `n` slots, or none if that would exceed `max_queue_length`.
    fn reserve(&self, n: usize) -> bool {
        let limit = self.settings.max_queue_length;
        self.unfinished
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                cur.checked_add(n).filter(|total| *total <= limit)
            })
            .is_ok()
    }

    fn release(&self, n: usize) {
        let _ = self
            .unfinished
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| Some(cur.saturating_sub(n)));
    }
}

// ---------------------------------------------------------------------------
// InMemoryQueue
// ---------------------------------------------------------------------------

/// Tree-shaped job queue held entirely in process memory.
///
/// Share it as `Arc<InMemoryQueue>`; workers and retry timers keep their own
/// clones of the `Arc`.
pub struct InMemoryQueue {
    settings: BTreeMap<String, QueueSettings>,
    queues: DashMap<String, Arc<QueueHandle>>,
    jobs: DashMap<JobKey, JobEntry>,
}

impl InMemoryQueue {
    /// Create a queue set. Queues missing from `settings` use
    /// [`QueueSettings::default`] when first touched.
    pub fn new(settings: BTreeMap<String, QueueSettings>) -> Self {
        Self {
            settings,
            queues: DashMap::new(),
            jobs: DashMap::new(),
        }
    }

    fn handle(&self, queue_name: &str) -> Arc<QueueHandle> {
        if let Some(handle) = self.queues.get(queue_name) {
            return Arc::clone(handle.value());
        }
        let settings = self.settings.get(queue_name).cloned().unwrap_or_default();
        let handle = self
            .queues
            .entry(queue_name.to_owned())
            .or_insert_with(|| Arc::new(QueueHandle::new(queue_name, settings)));
        Arc::clone(handle.value())
    }

    /// Total number of jobs currently held, finished ones included.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Jobs on `queue_name` that count against its `max_queue_length`.
    pub fn unfinished_count(&self, queue_name: &str) -> usize {
        self.queues
            .get(queue_name)
            .map_or(0, |h| h.unfinished.load(Ordering::Acquire))
    }

    // -----------------------------------------------------------------------
    // Workers
    // -----------------------------------------------------------------------

    /// Start the worker loop for `queue_name`.
    ///
    /// # Errors
    /// [`QueueError::WorkerAlreadyRunning`] if a worker already owns the queue.
    pub fn run_worker(
        self: &Arc<Self>,
        queue_name: &str,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<JoinHandle<()>, QueueError> {
        let handle = self.handle(queue_name);
        let mut ready = handle
            .ready_rx
            .lock()
            .take()
            .ok_or_else(|| QueueError::WorkerAlreadyRunning(queue_name.to_owned()))?;

        info!(
            "worker started for '{}' (concurrency={}, tokens={}/{}ms)",
            handle.name,
            handle.settings.concurrency_limit,
            handle.settings.max_request_token,
            handle.settings.regeneration_interval_ms,
        );

        let queue = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(job_id) = ready.recv().await {
                handle.limiter.acquire().await;
                let Ok(permit) = Arc::clone(&handle.concurrency).acquire_owned().await else {
                    break;
                };
                let key = JobKey { queue: handle.name.clone(), id: job_id };
                let queue = Arc::clone(&queue);
                let processor = Arc::clone(&processor);
                tokio::spawn(async move {
                    queue.run_job(key, processor.as_ref()).await;
                    drop(permit);
                });
            }
        }))
    }

    /// Periodically evict finished flows older than `retention`.
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration, retention: Duration) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tick.tick().await;
                let removed = queue.prune_finished(retention);
                if removed > 0 {
                    info!("evicted {} finished jobs", removed);
                }
            }
        })
    }

    fn enqueue(&self, key: &JobKey) {
        if self.handle(&key.queue).ready_tx.send(key.id.clone()).is_err() {
            warn!("queue '{}' stopped accepting jobs, dropping {}", key.queue, key.id);
        }
    }

    fn emit(&self, queue_name: &str, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.handle(queue_name).events.send(event);
    }

    #[instrument(skip(self, processor), fields(queue = %key.queue, job_id = %key.id))]
    async fn run_job(self: Arc<Self>, key: JobKey, processor: &dyn JobProcessor) {
        let (mut job, children, max_attempts) = {
            let Some(mut entry) = self.jobs.get_mut(&key) else {
                debug!("job evicted before it could run");
                return;
            };
            if entry.state != JobState::Waiting {
                return;
            }
            entry.state = JobState::Active;
            entry.attempts_made += 1;
            let max_attempts = entry
                .opts
                .attempts
                .unwrap_or(self.handle(&key.queue).settings.max_attempts);
            let job = Job {
                id: key.id.clone(),
                name: entry.name.clone(),
                queue_name: key.queue.clone(),
                data: entry.data.clone(),
                attempts_made: entry.attempts_made,
                children_values: BTreeMap::new(),
            };
            (job, entry.children.clone(), max_attempts)
        };

        for child in &children {
            if let Some(value) = self.jobs.get(child).and_then(|c| c.return_value.clone()) {
                job.children_values.insert(child.child_key(), value);
            }
        }

        let attempts_made = job.attempts_made;
        let name = job.name.clone();
        match processor.process(job).await {
            Ok(value) => self.complete(&key, value),
            Err(JobError::Retryable(msg)) if attempts_made < max_attempts => {
                self.retry_later(key, attempts_made, max_attempts, msg);
            }
            Err(err) => {
                let reason = err.to_string();
                self.fail(&key, &name, reason);
            }
        }
    }

    fn complete(&self, key: &JobKey, value: Value) {
        let (parent, was_unfinished) = {
            let Some(mut entry) = self.jobs.get_mut(key) else { return };
            let was_unfinished = !entry.state.is_finished();
            entry.state = JobState::Completed;
            entry.return_value = Some(value);
            entry.finished_at = Some(Instant::now());
            debug!("job '{}' completed", entry.name);
            (entry.parent.clone(), was_unfinished)
        };
        if was_unfinished {
            self.handle(&key.queue).release(1);
        }
        self.emit(&key.queue, QueueEvent::Completed { job_id: key.id.clone() });

        let Some(parent) = parent else { return };
        let released = match self.jobs.get_mut(&parent) {
            Some(mut p) => {
                p.pending_children = p.pending_children.saturating_sub(1);
                if p.pending_children == 0 && p.state == JobState::WaitingChildren {
                    p.state = JobState::Waiting;
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if released {
            self.enqueue(&parent);
        }
    }

    fn retry_later(self: Arc<Self>, key: JobKey, attempts_made: u32, max_attempts: u32, msg: String) {
        if let Some(mut entry) = self.jobs.get_mut(&key) {
            entry.state = JobState::Delayed;
        }
        let delay = self.handle(&key.queue).settings.backoff(attempts_made);
        warn!(
            "job {} retryable error (attempt {}/{}), retrying in {:?}: {}",
            key.id, attempts_made, max_attempts, delay, msg
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let requeue = match self.jobs.get_mut(&key) {
                Some(mut entry) if entry.state == JobState::Delayed => {
                    entry.state = JobState::Waiting;
                    true
                }
                _ => false,
            };
            if requeue {
                self.enqueue(&key);
            }
        });
    }

    /// Fail `key` and, while `fail_parent_on_failure` allows, its ancestors.
    fn fail(&self, key: &JobKey, name: &str, reason: String) {
        warn!("job '{}' ({}) failed: {}", name, key.id, reason);
        let parent_reason = format!("step '{name}' failed: {reason}");

        let mut current = Some((key.clone(), reason));
        while let Some((key, reason)) = current.take() {
            let parent = {
                let Some(mut entry) = self.jobs.get_mut(&key) else { break };
                if entry.state.is_finished() {
                    break;
                }
                entry.state = JobState::Failed;
                entry.failed_reason = Some(reason.clone());
                entry.finished_at = Some(Instant::now());
                if entry.opts.fail_parent_on_failure {
                    entry.parent.clone()
                } else {
                    None
                }
            };
            self.handle(&key.queue).release(1);
            self.emit(&key.queue, QueueEvent::Failed { job_id: key.id.clone(), reason });
            current = parent.map(|p| (p, parent_reason.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // Submission helpers
    // -----------------------------------------------------------------------

    /// Claim room for every job of `flow` on its queue, all or nothing.
    fn reserve_capacity(&self, flow: &FlowJob) -> Result<(), QueueError> {
        let mut incoming: HashMap<&str, usize> = HashMap::new();
        count_per_queue(flow, &mut incoming);

        let mut claimed: Vec<(Arc<QueueHandle>, usize)> = Vec::with_capacity(incoming.len());
        for (queue_name, new_jobs) in incoming {
            let handle = self.handle(queue_name);
            if !handle.reserve(new_jobs) {
                for (h, n) in &claimed {
                    h.release(*n);
                }
                return Err(QueueError::QueueFull {
                    queue: queue_name.to_owned(),
                    limit: handle.settings.max_queue_length,
                });
            }
            claimed.push((handle, new_jobs));
        }
        Ok(())
    }

    fn insert_tree(&self, flow: &FlowJob, parent: Option<JobKey>, ready: &mut Vec<JobKey>) -> JobKey {
        let key = JobKey {
            queue: flow.queue_name.clone(),
            id: Uuid::new_v4().to_string(),
        };
        let children: Vec<JobKey> = flow
            .children
            .iter()
            .map(|child| self.insert_tree(child, Some(key.clone()), ready))
            .collect();

        let state = if children.is_empty() {
            ready.push(key.clone());
            JobState::Waiting
        } else {
            JobState::WaitingChildren
        };

        self.jobs.insert(
            key.clone(),
            JobEntry {
                name: flow.name.clone(),
                data: flow.data.clone(),
                opts: flow.opts.clone(),
                state,
                parent,
                pending_children: children.len(),
                children,
                return_value: None,
                failed_reason: None,
                attempts_made: 0,
                finished_at: None,
            },
        );
        key
    }

    // -----------------------------------------------------------------------
    // Eviction
    // -----------------------------------------------------------------------

    /// Evict a job and everything below it. Returns `false` if it was unknown.
    pub fn remove(&self, queue_name: &str, job_id: &str) -> bool {
        let key = JobKey { queue: queue_name.to_owned(), id: job_id.to_owned() };
        self.remove_tree(&key) > 0
    }

    fn remove_tree(&self, key: &JobKey) -> usize {
        let Some((_, entry)) = self.jobs.remove(key) else { return 0 };
        if !entry.state.is_finished() {
            self.handle(&key.queue).release(1);
        }
        1 + entry.children.iter().map(|c| self.remove_tree(c)).sum::<usize>()
    }

    /// Evict finished flows (root jobs and their trees) that finished at
    /// least `older_than` ago. Returns the number of jobs removed.
    pub fn prune_finished(&self, older_than: Duration) -> usize {
        let expired: Vec<JobKey> = self
            .jobs
            .iter()
            .filter(|e| {
                let job = e.value();
                job.parent.is_none()
                    && job.state.is_finished()
                    && job.finished_at.is_some_and(|t| t.elapsed() >= older_than)
            })
            .map(|e| e.key().clone())
            .collect();
        expired.iter().map(|k| self.remove_tree(k)).sum()
    }

    fn snapshot(&self, key: &JobKey) -> Option<JobTree> {
        let (job, children) = {
            let entry = self.jobs.get(key)?;
            (
                JobSnapshot {
                    id: key.id.clone(),
                    name: entry.name.clone(),
                    queue_name: key.queue.clone(),
                    state: entry.state,
                    failed_reason: entry.failed_reason.clone(),
                },
                entry.children.clone(),
            )
        };
        Some(JobTree {
            job,
            children: children.iter().filter_map(|c| self.snapshot(c)).collect(),
        })
    }
}

fn count_per_queue<'a>(flow: &'a FlowJob, acc: &mut HashMap<&'a str, usize>) {
    *acc.entry(flow.queue_name.as_str()).or_insert(0) += 1;
    for child in &flow.children {
        count_per_queue(child, acc);
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn add_flow(&self, flow: FlowJob) -> Result<AddedFlow, QueueError> {
        self.reserve_capacity(&flow)?;

        let mut ready = Vec::new();
        let root = self.insert_tree(&flow, None, &mut ready);
        for key in &ready {
            self.enqueue(key);
        }

        info!(
            "flow '{}' added: {} jobs, root {} on '{}'",
            flow.name,
            flow.job_count(),
            root.id,
            root.queue
        );
        Ok(AddedFlow {
            job_id: root.id,
            name: flow.name,
            queue_name: root.queue,
        })
    }

    async fn job_state(&self, queue_name: &str, job_id: &str) -> Result<Option<JobState>, QueueError> {
        let key = JobKey { queue: queue_name.to_owned(), id: job_id.to_owned() };
        Ok(self.jobs.get(&key).map(|e| e.state))
    }

    async fn get_flow(&self, queue_name: &str, job_id: &str) -> Result<Option<JobTree>, QueueError> {
        let key = JobKey { queue: queue_name.to_owned(), id: job_id.to_owned() };
        Ok(self.snapshot(&key))
    }

    fn subscribe(&self, queue_name: &str) -> broadcast::Receiver<QueueEvent> {
        self.handle(queue_name).events.subscribe()
    }
}
