use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::app::AppState;
use crate::api::error::ApiError;
use crate::batches::{self, Batch, BatchProgress, ManifestEntry};
use crate::error::PipelineError;
use crate::tasks::TaskPriority;

#[derive(Deserialize)]
pub struct SubmitBatchRequest {
    pub project_id: Uuid,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    pub documents: Vec<ManifestEntryRequest>,
}

#[derive(Deserialize)]
pub struct ManifestEntryRequest {
    pub object_key: String,
}

#[derive(Serialize)]
pub struct SubmitBatchResponse {
    pub batch_id: Uuid,
    pub document_ids: Vec<Uuid>,
}

pub async fn submit_batch_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<SubmitBatchRequest>,
) -> Result<(StatusCode, Json<SubmitBatchResponse>), ApiError> {
    if request.documents.is_empty() {
        return Err(PipelineError::Validation("batch manifest is empty".to_string()).into());
    }

    let manifest: Vec<ManifestEntry> = request
        .documents
        .into_iter()
        .map(|d| ManifestEntry {
            object_key: d.object_key,
        })
        .collect();

    let (batch, document_ids) = batches::submit_batch(
        request.project_id,
        request.priority.unwrap_or_default(),
        manifest,
        &state.deps,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitBatchResponse {
            batch_id: batch.id,
            document_ids,
        }),
    ))
}

#[derive(Serialize)]
pub struct BatchStatusResponse {
    pub batch: Batch,
    pub progress: BatchProgress,
    pub complete: bool,
}

pub async fn batch_status_handler(
    Extension(state): Extension<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchStatusResponse>, ApiError> {
    let Some(batch) = Batch::find_by_id(batch_id, &state.deps.db_pool).await? else {
        return Err(ApiError::not_found(format!("batch {batch_id} not found")));
    };

    let progress = batches::batch_progress(batch_id, &state.deps).await?;
    let complete = progress.is_complete();

    Ok(Json(BatchStatusResponse {
        batch,
        progress,
        complete,
    }))
}
