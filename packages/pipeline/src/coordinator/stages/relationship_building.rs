//! Extract relationships among the resolved entities of each chunk.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

use crate::documents::{Chunk, Document};
use crate::kernel::PipelineDeps;
use crate::relationships::{NewRelationship, Relationship};
use crate::resolution::{CanonicalEntity, EntityMention};

pub async fn run(document: &Document, deps: &Arc<PipelineDeps>) -> Result<()> {
    let pool = &deps.db_pool;

    if Relationship::count_for_document(document.id, pool).await? > 0 {
        info!(document_id = %document.id, "relationships already exist, skipping");
        return Ok(());
    }

    let mentions = EntityMention::find_by_document(document.id, pool).await?;

    // Entities referenced by this document's mentions, by normalized
    // name. The extractor reports pairs by name; we map back to ids.
    let entity_ids: Vec<Uuid> = {
        let mut ids: Vec<Uuid> = mentions
            .iter()
            .filter_map(|m| m.canonical_entity_id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    };

    if entity_ids.len() < 2 {
        info!(
            document_id = %document.id,
            entities = entity_ids.len(),
            "too few entities for relationships"
        );
        return Ok(());
    }

    let entities = CanonicalEntity::find_by_ids(&entity_ids, pool).await?;
    let by_name: HashMap<&str, Uuid> = entities
        .iter()
        .map(|e| (e.normalized_name.as_str(), e.id))
        .collect();

    // Entities present per chunk, so extraction only sees names the
    // chunk actually mentions.
    let mut entities_in_chunk: HashMap<Uuid, Vec<String>> = HashMap::new();
    for mention in &mentions {
        let Some(entity_id) = mention.canonical_entity_id else {
            continue;
        };
        if let Some(entity) = entities.iter().find(|e| e.id == entity_id) {
            let names = entities_in_chunk.entry(mention.chunk_id).or_default();
            if !names.contains(&entity.normalized_name) {
                names.push(entity.normalized_name.clone());
            }
        }
    }

    let chunks = Chunk::find_by_document(document.id, pool).await?;
    let mut new_relationships = Vec::new();

    for chunk in &chunks {
        let Some(names) = entities_in_chunk.get(&chunk.id) else {
            continue;
        };
        if names.len() < 2 {
            continue;
        }

        let extracted = deps
            .extractor
            .extract_relationships(&chunk.text, names)
            .await
            .with_context(|| format!("relationship extraction failed on chunk {}", chunk.id))?;

        for rel in extracted {
            let (Some(&source), Some(&target)) = (
                by_name.get(rel.source_name.as_str()),
                by_name.get(rel.target_name.as_str()),
            ) else {
                // The extractor named an entity we never resolved;
                // drop the pair rather than fabricate an endpoint.
                continue;
            };
            if source == target {
                continue;
            }

            new_relationships.push(NewRelationship {
                source_entity_id: source,
                target_entity_id: target,
                relationship_type: rel.relationship_type,
                chunk_id: Some(chunk.id),
                confidence: rel.confidence,
                evidence: rel.evidence,
            });
        }
    }

    let created = Relationship::create_all(document.id, &new_relationships, pool).await?;

    info!(
        document_id = %document.id,
        relationships = created.len(),
        "relationship building committed"
    );

    Ok(())
}
