//! Entity extraction over chunks, with oversized inputs split into
//! durable, individually-resumable provider calls.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::coordinator::split::{split_units, PartStatus, PlannedPart, SplitPart};
use crate::coordinator::Stage;
use crate::documents::{Chunk, Document};
use crate::error::PipelineError;
use crate::kernel::{ExtractedEntity, PipelineDeps};
use crate::resolution::{EntityMention, NewMention};

pub async fn run(document: &Document, deps: &Arc<PipelineDeps>) -> Result<()> {
    let pool = &deps.db_pool;

    // Mentions are committed in one transaction at the join, so any
    // existing mention means a prior attempt finished.
    if EntityMention::count_for_document(document.id, pool).await? > 0 {
        info!(document_id = %document.id, "mentions already exist, skipping");
        return Ok(());
    }

    let chunks = Chunk::find_by_document(document.id, pool).await?;
    if chunks.is_empty() {
        return Err(
            PipelineError::Data(format!("document {} has no chunks", document.id)).into(),
        );
    }

    // Plan provider calls: each chunk yields one part, or several when
    // it exceeds the provider's input ceiling. The plan is durable, so
    // a restarted worker resumes it instead of re-planning.
    let ceiling = deps.tunables.provider_input_ceiling;
    let mut planned = Vec::new();
    for chunk in &chunks {
        for (offset, slice) in split_units(&chunk.text, ceiling) {
            planned.push(PlannedPart {
                chunk_id: Some(chunk.id),
                base_offset: offset as i32,
                input: slice,
            });
        }
    }

    if planned.is_empty() {
        return Err(PipelineError::Data(format!(
            "document {} has no extractable text",
            document.id
        ))
        .into());
    }

    let parts = SplitPart::plan(document.id, Stage::EntityExtraction, planned, pool).await?;
    let total = parts.len();

    for part in &parts {
        if part.status == PartStatus::Completed {
            continue;
        }

        let entities = deps
            .extractor
            .extract_entities(&part.input)
            .await
            .with_context(|| format!("entity extraction failed on part {}", part.part_index))?;

        part.complete(&serde_json::to_value(&entities)?, pool).await?;
    }

    // Join: all parts completed, assemble mentions with offsets rebased
    // from part-relative to chunk-relative.
    let parts = SplitPart::find_all(document.id, Stage::EntityExtraction, pool).await?;
    let mut mentions = Vec::new();
    for part in &parts {
        let chunk_id = part.chunk_id.ok_or_else(|| {
            PipelineError::Data(format!("split part {} has no chunk", part.id))
        })?;
        let result = part.result.clone().ok_or_else(|| {
            PipelineError::Data(format!("split part {} completed without a result", part.id))
        })?;
        let entities: Vec<ExtractedEntity> =
            serde_json::from_value(result).context("corrupt split part result")?;

        for entity in entities {
            mentions.push(NewMention {
                chunk_id,
                surface_text: entity.surface_text,
                entity_type: entity.entity_type,
                start_offset: part.base_offset + entity.start_offset,
                end_offset: part.base_offset + entity.end_offset,
                confidence: entity.confidence,
            });
        }
    }

    let created = EntityMention::create_all(document.id, &mentions, pool).await?;

    // Join state has served its purpose once the mentions commit.
    SplitPart::clear(document.id, Stage::EntityExtraction, pool).await?;

    info!(
        document_id = %document.id,
        parts = total,
        mentions = created.len(),
        "entity extraction committed"
    );

    Ok(())
}
