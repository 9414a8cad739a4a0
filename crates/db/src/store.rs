//! The `WorkflowStore` seam and its two implementations.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::repository::workflows as repo;
use crate::{DbError, DbPool, NewWorkflow, WorkflowRow};

/// Persistence operations the orchestrator needs for workflow records.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn insert(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError>;

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowRow>, DbError>;

    async fn find_by_root_job(
        &self,
        queue_name: &str,
        root_job_id: &str,
    ) -> Result<Option<WorkflowRow>, DbError>;

    /// `DbError::NotFound` if the record no longer exists.
    async fn update_status(&self, id: Uuid, status: &str) -> Result<(), DbError>;

    /// `DbError::NotFound` if the record no longer exists.
    async fn delete(&self, id: Uuid) -> Result<(), DbError>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

/// Store backed by the `workflow` table.
#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: DbPool,
}

impl PgWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn insert(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError> {
        repo::create_workflow(&self.pool, &new).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowRow>, DbError> {
        repo::get_workflow(&self.pool, id).await
    }

    async fn find_by_root_job(
        &self,
        queue_name: &str,
        root_job_id: &str,
    ) -> Result<Option<WorkflowRow>, DbError> {
        repo::find_by_root_job(&self.pool, queue_name, root_job_id).await
    }

    async fn update_status(&self, id: Uuid, status: &str) -> Result<(), DbError> {
        repo::update_workflow_status(&self.pool, id, status).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), DbError> {
        repo::delete_workflow(&self.pool, id).await
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Store for tests and database-less runs.
#[derive(Default)]
pub struct MemoryWorkflowStore {
    rows: DashMap<Uuid, WorkflowRow>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn insert(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError> {
        let now = Utc::now();
        let row = WorkflowRow {
            id: new.id,
            root_job_id: new.root_job_id,
            queue_name: new.queue_name,
            status: new.status.to_string(),
            definition: new.definition,
            created_at: now,
            updated_at: now,
        };
        self.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowRow>, DbError> {
        Ok(self.rows.get(&id).map(|r| r.clone()))
    }

    async fn find_by_root_job(
        &self,
        queue_name: &str,
        root_job_id: &str,
    ) -> Result<Option<WorkflowRow>, DbError> {
        Ok(self
            .rows
            .iter()
            .find(|r| r.queue_name == queue_name && r.root_job_id == root_job_id)
            .map(|r| r.value().clone()))
    }

    async fn update_status(&self, id: Uuid, status: &str) -> Result<(), DbError> {
        let mut row = self.rows.get_mut(&id).ok_or(DbError::NotFound)?;
        row.status = status.to_owned();
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), DbError> {
        self.rows.remove(&id).map(|_| ()).ok_or(DbError::NotFound)
    }
}
