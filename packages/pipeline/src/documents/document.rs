use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::coordinator::Stage;

/// Lifecycle status of a document: the stage it is currently in, or a
/// terminal state. Never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "document_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    TextExtraction,
    Chunking,
    EntityExtraction,
    EntityResolution,
    RelationshipBuilding,
    Finalization,
    Completed,
    Failed,
}

impl DocumentStatus {
    /// Position in the lifecycle. Failed sits outside the order and is
    /// reachable from any stage.
    pub fn ordinal(&self) -> usize {
        match self {
            DocumentStatus::Pending => 0,
            DocumentStatus::TextExtraction => 1,
            DocumentStatus::Chunking => 2,
            DocumentStatus::EntityExtraction => 3,
            DocumentStatus::EntityResolution => 4,
            DocumentStatus::RelationshipBuilding => 5,
            DocumentStatus::Finalization => 6,
            DocumentStatus::Completed => 7,
            DocumentStatus::Failed => 8,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    /// The status a document holds while the given stage runs.
    pub fn of_stage(stage: Stage) -> Self {
        match stage {
            Stage::TextExtraction => DocumentStatus::TextExtraction,
            Stage::Chunking => DocumentStatus::Chunking,
            Stage::EntityExtraction => DocumentStatus::EntityExtraction,
            Stage::EntityResolution => DocumentStatus::EntityResolution,
            Stage::RelationshipBuilding => DocumentStatus::RelationshipBuilding,
            Stage::Finalization => DocumentStatus::Finalization,
        }
    }

    /// The status a document holds just before the given stage runs.
    pub fn before_stage(stage: Stage) -> Self {
        match stage {
            Stage::TextExtraction => DocumentStatus::Pending,
            Stage::Chunking => DocumentStatus::TextExtraction,
            Stage::EntityExtraction => DocumentStatus::Chunking,
            Stage::EntityResolution => DocumentStatus::EntityExtraction,
            Stage::RelationshipBuilding => DocumentStatus::EntityResolution,
            Stage::Finalization => DocumentStatus::RelationshipBuilding,
        }
    }
}

/// A document moving through the pipeline. Mutated once per stage,
/// never hard-deleted.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Document {
    pub id: Uuid,
    pub project_id: Uuid,
    pub status: DocumentStatus,
    pub object_key: Option<String>,
    pub extracted_text: Option<String>,
    pub text_sha256: Option<String>,
    pub page_count: Option<i32>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub async fn create(project_id: Uuid, object_key: &str, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO documents (id, project_id, object_key) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(object_key)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Move the document into a stage. Guarded so the transition is
    /// monotonic: only the immediately preceding status, or the stage's
    /// own status (retry of an interrupted attempt), may advance into
    /// it. Returns false when the guard rejects the transition.
    pub async fn enter_stage(id: Uuid, stage: Stage, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = $2, updated_at = NOW()
             WHERE id = $1 AND status IN ($3, $2)",
        )
        .bind(id)
        .bind(DocumentStatus::of_stage(stage))
        .bind(DocumentStatus::before_stage(stage))
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_completed(id: Uuid, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET status = 'completed', error_message = NULL, updated_at = NOW()
             WHERE id = $1 AND status = 'finalization'",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn mark_failed(id: Uuid, error: &str, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET status = 'failed', error_message = $2, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Reset a failed document so it can be resubmitted. The document
    /// returns to the status preceding the given stage; the caller
    /// enqueues a fresh task for that stage.
    pub async fn reset_for_retry(id: Uuid, stage: Stage, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = $2, error_message = NULL, updated_at = NOW()
             WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .bind(DocumentStatus::before_stage(stage))
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_extracted_text(
        id: Uuid,
        text: &str,
        sha256: &str,
        page_count: i32,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE documents
             SET extracted_text = $2, text_sha256 = $3, page_count = $4, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(text)
        .bind(sha256)
        .bind(page_count)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Live status counts for a set of documents (batch progress).
    pub async fn status_counts(
        ids: &[Uuid],
        pool: &PgPool,
    ) -> Result<Vec<(DocumentStatus, i64)>> {
        let rows = sqlx::query_as::<_, (DocumentStatus, i64)>(
            "SELECT status, COUNT(*) FROM documents WHERE id = ANY($1) GROUP BY status",
        )
        .bind(ids)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}
