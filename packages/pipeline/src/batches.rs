//! Batch submission and progress.
//!
//! A batch is the unit of intake: an ordered manifest of documents
//! submitted together at one priority tier. Progress is computed from
//! live document statuses, with a short-lived cache snapshot absorbing
//! hot polling from the status API.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::coordinator::Stage;
use crate::documents::{Document, DocumentStatus};
use crate::kernel::PipelineDeps;
use crate::tasks::{StageTaskSpec, TaskPriority};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Batch {
    pub id: Uuid,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry in a batch manifest.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub object_key: String,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct BatchProgress {
    pub batch_id: Uuid,
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
}

impl BatchProgress {
    /// A batch is done when every document reached a terminal state,
    /// regardless of which one.
    pub fn is_complete(&self) -> bool {
        self.completed + self.failed == self.total
    }
}

impl Batch {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM batches WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn document_ids(id: Uuid, pool: &PgPool) -> Result<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT document_id FROM batch_documents WHERE batch_id = $1 ORDER BY ordinal ASC",
        )
        .bind(id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}

/// Create a batch with its documents in one transaction, then enqueue
/// the first stage for each at the batch's priority. Task enqueueing
/// sits outside the transaction; the (document, stage) idempotency key
/// makes a re-run of a half-finished submission safe.
pub async fn submit_batch(
    project_id: Uuid,
    priority: TaskPriority,
    manifest: Vec<ManifestEntry>,
    deps: &Arc<PipelineDeps>,
) -> Result<(Batch, Vec<Uuid>)> {
    anyhow::ensure!(!manifest.is_empty(), "batch manifest is empty");

    let pool = &deps.db_pool;
    let mut tx = pool.begin().await?;

    let batch = sqlx::query_as::<_, Batch>(
        "INSERT INTO batches (id, priority) VALUES ($1, $2) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(priority)
    .fetch_one(&mut *tx)
    .await?;

    let mut document_ids = Vec::with_capacity(manifest.len());
    for (ordinal, entry) in manifest.iter().enumerate() {
        let document_id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO documents (id, project_id, object_key) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(&entry.object_key)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO batch_documents (batch_id, document_id, ordinal) VALUES ($1, $2, $3)",
        )
        .bind(batch.id)
        .bind(document_id)
        .bind(ordinal as i32)
        .execute(&mut *tx)
        .await?;

        document_ids.push(document_id);
    }

    tx.commit().await?;

    for document_id in &document_ids {
        let spec = StageTaskSpec::new(*document_id, Stage::TextExtraction)
            .with_priority(priority)
            .with_max_retries(deps.tunables.max_task_retries);
        deps.queue.enqueue(spec).await?;
    }

    info!(
        batch_id = %batch.id,
        documents = document_ids.len(),
        ?priority,
        "batch submitted"
    );

    Ok((batch, document_ids))
}

/// Live progress for a batch, served from a short-TTL cache snapshot
/// when one exists.
pub async fn batch_progress(batch_id: Uuid, deps: &Arc<PipelineDeps>) -> Result<BatchProgress> {
    if let Some(cached) = deps.cache.batch_progress(batch_id).await? {
        if let Ok(progress) = serde_json::from_value::<BatchProgress>(cached) {
            return Ok(progress);
        }
    }

    let document_ids = Batch::document_ids(batch_id, &deps.db_pool).await?;
    let counts = Document::status_counts(&document_ids, &deps.db_pool).await?;

    let mut progress = BatchProgress {
        batch_id,
        total: document_ids.len() as i64,
        pending: 0,
        in_progress: 0,
        completed: 0,
        failed: 0,
    };

    for (status, count) in counts {
        match status {
            DocumentStatus::Pending => progress.pending += count,
            DocumentStatus::Completed => progress.completed += count,
            DocumentStatus::Failed => progress.failed += count,
            _ => progress.in_progress += count,
        }
    }

    deps.cache
        .cache_batch_progress(batch_id, &json!(progress))
        .await?;

    Ok(progress)
}
