use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use super::AppState;
use crate::ApiError;
use engine::{SubmittedWorkflow, TaskDefinition, WorkflowView};

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<Vec<TaskDefinition>>, JsonRejection>,
) -> Result<Json<SubmittedWorkflow>, ApiError> {
    let Json(tasks) = payload?;
    let submitted = state.orchestrator.submit(tasks).await?;
    Ok(Json(submitted))
}

pub async fn create_from_template(
    Path(name): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SubmittedWorkflow>, ApiError> {
    let Json(params) = payload?;
    let submitted = state.orchestrator.submit_template(&name, &params).await?;
    info!("template '{}' submitted as {}", name, submitted.workflow_id);
    Ok(Json(submitted))
}

pub async fn query(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowView>, ApiError> {
    match state.orchestrator.query(id).await? {
        Some(view) => Ok(Json(view)),
        None => Err(ApiError::NotFound(format!("workflow {id} not found"))),
    }
}
