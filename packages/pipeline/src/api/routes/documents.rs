use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::app::AppState;
use crate::api::error::ApiError;
use crate::coordinator::{self, Stage};
use crate::documents::{Document, DocumentStatus};
use crate::tasks::{ProcessingTask, TaskPriority, TaskStatus};

#[derive(Serialize)]
pub struct TaskSummary {
    pub id: Uuid,
    pub stage: Stage,
    pub status: TaskStatus,
    pub attempt: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Serialize)]
pub struct DocumentStatusResponse {
    pub document: Document,
    /// Status as the cache sees it; may lag the durable value briefly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_status: Option<DocumentStatus>,
    pub tasks: Vec<TaskSummary>,
}

pub async fn document_status_handler(
    Extension(state): Extension<AppState>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<DocumentStatusResponse>, ApiError> {
    let Some(document) = Document::find_by_id(document_id, &state.deps.db_pool).await? else {
        return Err(ApiError::not_found(format!("document {document_id} not found")));
    };

    let cached_status = state.deps.cache.document_status(document_id).await?;

    let tasks = ProcessingTask::find_by_document(document_id, &state.deps.db_pool)
        .await?
        .into_iter()
        .map(|t| TaskSummary {
            id: t.id,
            stage: t.stage,
            status: t.status,
            attempt: t.attempt,
            error_class: t.error_class,
            error_message: t.error_message,
        })
        .collect();

    Ok(Json(DocumentStatusResponse {
        document,
        cached_status,
        tasks,
    }))
}

#[derive(Deserialize, Default)]
pub struct ResubmitRequest {
    #[serde(default)]
    pub priority: Option<TaskPriority>,
}

#[derive(Serialize)]
pub struct ResubmitResponse {
    pub document_id: Uuid,
    pub resumed_from: Stage,
}

pub async fn resubmit_document_handler(
    Extension(state): Extension<AppState>,
    Path(document_id): Path<Uuid>,
    body: Option<Json<ResubmitRequest>>,
) -> Result<Json<ResubmitResponse>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let resumed_from =
        coordinator::resubmit_document(document_id, request.priority, &state.deps).await?;

    Ok(Json(ResubmitResponse {
        document_id,
        resumed_from,
    }))
}
