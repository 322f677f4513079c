//! Mark the document complete, publish its summary, and clean interim
//! state.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::{info, warn};

use crate::coordinator::split::SplitPart;
use crate::coordinator::Stage;
use crate::documents::{Chunk, Document, DocumentStatus};
use crate::kernel::PipelineDeps;
use crate::relationships::Relationship;
use crate::resolution::EntityMention;

pub async fn run(document: &Document, deps: &Arc<PipelineDeps>) -> Result<()> {
    let pool = &deps.db_pool;

    let chunk_count = Chunk::count_for_document(document.id, pool).await?;
    let mention_count = EntityMention::count_for_document(document.id, pool).await?;
    let entity_count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(DISTINCT canonical_entity_id) FROM entity_mentions
         WHERE document_id = $1 AND canonical_entity_id IS NOT NULL",
    )
    .bind(document.id)
    .fetch_one(pool)
    .await?;
    let relationship_count = Relationship::count_for_document(document.id, pool).await?;

    // The durable commit; everything after is best-effort mirroring
    // and cleanup.
    Document::mark_completed(document.id, pool).await?;

    for stage in Stage::ALL {
        SplitPart::clear(document.id, stage, pool).await?;
    }

    // Interim spill of the extracted text, if one was made. The row
    // keeps the durable copy.
    let text_key = super::text_extraction::extracted_text_key(document.id);
    if let Err(err) = deps.object_store.delete(&text_key).await {
        warn!(document_id = %document.id, error = %err, "failed to delete spilled text");
    }

    let summary = json!({
        "document_id": document.id,
        "chunks": chunk_count,
        "mentions": mention_count,
        "entities": entity_count,
        "relationships": relationship_count,
    });

    if let Err(err) = deps
        .cache
        .record_status(document.id, DocumentStatus::Completed)
        .await
    {
        warn!(document_id = %document.id, error = %err, "failed to mirror completed status");
    }
    if let Err(err) = deps
        .cache
        .cache_result(document.id, Stage::Finalization, &summary, None)
        .await
    {
        warn!(document_id = %document.id, error = %err, "failed to cache summary");
    }

    info!(
        document_id = %document.id,
        chunks = chunk_count,
        mentions = mention_count,
        entities = entity_count,
        relationships = relationship_count,
        "document completed"
    );

    Ok(())
}
