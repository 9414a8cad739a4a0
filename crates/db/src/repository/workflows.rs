//! Workflow record operations.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{NewWorkflow, WorkflowRow},
    DbError,
};

const COLUMNS: &str = "id, root_job_id, queue_name, status, definition, created_at, updated_at";

/// Insert a new workflow record.
pub async fn create_workflow(pool: &PgPool, new: &NewWorkflow) -> Result<WorkflowRow, DbError> {
    let now = Utc::now();
    let sql = format!(
        "INSERT INTO workflow ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $6) RETURNING {COLUMNS}"
    );

    let row = sqlx::query_as::<_, WorkflowRow>(&sql)
        .bind(new.id)
        .bind(&new.root_job_id)
        .bind(&new.queue_name)
        .bind(new.status.to_string())
        .bind(&new.definition)
        .bind(now)
        .fetch_one(pool)
        .await?;

    Ok(row)
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<Option<WorkflowRow>, DbError> {
    let sql = format!("SELECT {COLUMNS} FROM workflow WHERE id = $1");
    let row = sqlx::query_as::<_, WorkflowRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Fetch the workflow whose chain is rooted at `root_job_id` on `queue_name`.
pub async fn find_by_root_job(
    pool: &PgPool,
    queue_name: &str,
    root_job_id: &str,
) -> Result<Option<WorkflowRow>, DbError> {
    let sql = format!("SELECT {COLUMNS} FROM workflow WHERE queue_name = $1 AND root_job_id = $2");
    let row = sqlx::query_as::<_, WorkflowRow>(&sql)
        .bind(queue_name)
        .bind(root_job_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Set `status` and bump `updated_at`.
///
/// Returns `DbError::NotFound` if no row was updated.
pub async fn update_workflow_status(pool: &PgPool, id: Uuid, status: &str) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE workflow SET status = $1, updated_at = $2 WHERE id = $3")
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

/// Permanently delete a workflow by its primary key.
///
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_workflow(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM workflow WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
