//! Typed relationships between canonical entities, with provenance
//! back to the document and chunk that evidenced them.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Relationship {
    pub id: Uuid,
    pub source_entity_id: Uuid,
    pub target_entity_id: Uuid,
    pub relationship_type: String,
    pub document_id: Uuid,
    pub chunk_id: Option<Uuid>,
    pub confidence: f64,
    pub evidence: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRelationship {
    pub source_entity_id: Uuid,
    pub target_entity_id: Uuid,
    pub relationship_type: String,
    pub chunk_id: Option<Uuid>,
    pub confidence: f64,
    pub evidence: Option<String>,
}

impl Relationship {
    pub async fn create_all(
        document_id: Uuid,
        relationships: &[NewRelationship],
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let mut tx = pool.begin().await?;
        let mut created = Vec::with_capacity(relationships.len());

        for rel in relationships {
            let row = sqlx::query_as::<_, Self>(
                "INSERT INTO relationships
                     (id, source_entity_id, target_entity_id, relationship_type,
                      document_id, chunk_id, confidence, evidence)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 RETURNING *",
            )
            .bind(Uuid::new_v4())
            .bind(rel.source_entity_id)
            .bind(rel.target_entity_id)
            .bind(&rel.relationship_type)
            .bind(document_id)
            .bind(rel.chunk_id)
            .bind(rel.confidence)
            .bind(rel.evidence.as_deref())
            .fetch_one(&mut *tx)
            .await?;

            created.push(row);
        }

        tx.commit().await?;
        Ok(created)
    }

    pub async fn find_by_document(document_id: Uuid, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM relationships WHERE document_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(document_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn count_for_document(document_id: Uuid, pool: &PgPool) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM relationships WHERE document_id = $1")
            .bind(document_id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }
}
