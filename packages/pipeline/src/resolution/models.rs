use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Closed set of entity types the extractor may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entity_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Date,
    Money,
    Other,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Person,
        EntityType::Organization,
        EntityType::Location,
        EntityType::Date,
        EntityType::Money,
        EntityType::Other,
    ];
}

/// How a mention got its canonical entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "resolution_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Exact,
    Fuzzy,
    Created,
}

/// One in-text occurrence of an entity, scoped to a chunk.
/// Mutated exactly once, by resolution.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EntityMention {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_id: Uuid,
    pub mention_index: i32,
    pub surface_text: String,
    pub entity_type: EntityType,
    pub start_offset: i32,
    pub end_offset: i32,
    pub confidence: f64,
    pub canonical_entity_id: Option<Uuid>,
    pub resolution_method: Option<ResolutionMethod>,
    pub created_at: DateTime<Utc>,
}

/// A mention before insertion.
#[derive(Debug, Clone)]
pub struct NewMention {
    pub chunk_id: Uuid,
    pub surface_text: String,
    pub entity_type: EntityType,
    pub start_offset: i32,
    pub end_offset: i32,
    pub confidence: f64,
}

impl EntityMention {
    pub async fn create_all(
        document_id: Uuid,
        mentions: &[NewMention],
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let mut tx = pool.begin().await?;
        let mut created = Vec::with_capacity(mentions.len());

        // NOW() is fixed within the transaction; mention_index carries
        // the insertion order.
        let base_index = sqlx::query_scalar::<_, Option<i32>>(
            "SELECT MAX(mention_index) FROM entity_mentions WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_one(&mut *tx)
        .await?
        .map_or(0, |max| max + 1);

        for (offset, mention) in mentions.iter().enumerate() {
            let row = sqlx::query_as::<_, Self>(
                "INSERT INTO entity_mentions
                     (id, document_id, chunk_id, mention_index, surface_text, entity_type,
                      start_offset, end_offset, confidence)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 RETURNING *",
            )
            .bind(Uuid::new_v4())
            .bind(document_id)
            .bind(mention.chunk_id)
            .bind(base_index + offset as i32)
            .bind(&mention.surface_text)
            .bind(mention.entity_type)
            .bind(mention.start_offset)
            .bind(mention.end_offset)
            .bind(mention.confidence)
            .fetch_one(&mut *tx)
            .await?;

            created.push(row);
        }

        tx.commit().await?;
        Ok(created)
    }

    pub async fn find_by_document(document_id: Uuid, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM entity_mentions WHERE document_id = $1 ORDER BY mention_index ASC",
        )
        .bind(document_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn count_for_document(document_id: Uuid, pool: &PgPool) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM entity_mentions WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Unresolved mentions for a document, in stable order.
    pub async fn find_unresolved(document_id: Uuid, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM entity_mentions
             WHERE document_id = $1 AND canonical_entity_id IS NULL
             ORDER BY mention_index ASC",
        )
        .bind(document_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Attach this mention to its canonical entity. The one permitted
    /// mutation: only an unresolved mention may be attached.
    pub async fn attach(
        id: Uuid,
        canonical_entity_id: Uuid,
        method: ResolutionMethod,
        final_confidence: f64,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE entity_mentions
             SET canonical_entity_id = $2, resolution_method = $3, confidence = $4
             WHERE id = $1 AND canonical_entity_id IS NULL",
        )
        .bind(id)
        .bind(canonical_entity_id)
        .bind(method)
        .bind(final_confidence)
        .execute(pool)
        .await?;

        Ok(())
    }
}

/// The deduplicated, authoritative representation of a real-world
/// entity. Never deleted; merged entities point at their survivor via
/// `merged_into`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CanonicalEntity {
    pub id: Uuid,
    pub project_id: Uuid,
    pub normalized_name: String,
    pub entity_type: EntityType,
    pub mention_count: i32,
    pub merged_into: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalEntity {
    pub async fn create(
        project_id: Uuid,
        normalized_name: &str,
        entity_type: EntityType,
        pool: &PgPool,
    ) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO canonical_entities (id, project_id, normalized_name, entity_type, mention_count)
             VALUES ($1, $2, $3, $4, 1)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(normalized_name)
        .bind(entity_type)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM canonical_entities WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_ids(ids: &[Uuid], pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM canonical_entities WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    /// Exact-match lookup among live (unmerged) entities of the same
    /// type and project scope.
    pub async fn find_exact(
        project_id: Uuid,
        entity_type: EntityType,
        normalized_name: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM canonical_entities
             WHERE project_id = $1 AND entity_type = $2 AND normalized_name = $3
               AND merged_into IS NULL
             ORDER BY created_at ASC, id ASC
             LIMIT 1",
        )
        .bind(project_id)
        .bind(entity_type)
        .bind(normalized_name)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// All live candidates of a type within a project, earliest first
    /// (the fuzzy tie-break order).
    pub async fn find_candidates(
        project_id: Uuid,
        entity_type: EntityType,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM canonical_entities
             WHERE project_id = $1 AND entity_type = $2 AND merged_into IS NULL
             ORDER BY created_at ASC, id ASC",
        )
        .bind(project_id)
        .bind(entity_type)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn increment_mentions(id: Uuid, by: i32, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE canonical_entities
             SET mention_count = mention_count + $2, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(by)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Follow the merge chain to the live survivor.
    pub async fn resolve_live(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let mut current = Self::find_by_id(id, pool).await?;

        while let Some(entity) = &current {
            match entity.merged_into {
                Some(target) => current = Self::find_by_id(target, pool).await?,
                None => break,
            }
        }

        Ok(current)
    }
}

/// Re-point a source entity's mentions at the target inside an open
/// transaction. Split out so the merge stays all-or-nothing.
pub(crate) async fn repoint_mentions(
    tx: &mut Transaction<'_, Postgres>,
    source_id: Uuid,
    target_id: Uuid,
) -> Result<u64> {
    let moved = sqlx::query(
        "UPDATE entity_mentions SET canonical_entity_id = $2 WHERE canonical_entity_id = $1",
    )
    .bind(source_id)
    .bind(target_id)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    Ok(moved)
}
