//! Entity resolution: attach every mention to exactly one canonical
//! entity via normalize, exact match, fuzzy match, or creation.

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{CanonicalEntity, EntityMention, ResolutionMethod};
use super::similarity;
use crate::kernel::BaseEntityExtractor;

/// Similarity at or above this nominates a pair of live entities for
/// merge adjudication. Below the fuzzy threshold on purpose: the band
/// between them is where near-duplicates from separate documents
/// accumulate, and the adjudicator has the final say either way.
const MERGE_CANDIDATE_FLOOR: f64 = 0.6;

pub struct ResolutionOutcome {
    pub entity_id: Uuid,
    pub method: ResolutionMethod,
    pub score: f64,
}

pub struct ResolutionEngine {
    fuzzy_threshold: f64,
}

impl ResolutionEngine {
    pub fn new(fuzzy_threshold: f64) -> Self {
        Self { fuzzy_threshold }
    }

    /// Resolve all unresolved mentions for a document. Mentions are
    /// processed in creation order so a rerun lands on the same
    /// canonical entities.
    pub async fn resolve_document(
        &self,
        document_id: Uuid,
        project_id: Uuid,
        pool: &PgPool,
    ) -> Result<usize> {
        let mentions = EntityMention::find_unresolved(document_id, pool).await?;
        let total = mentions.len();

        for mention in mentions {
            self.resolve_mention(&mention, project_id, pool)
                .await
                .with_context(|| format!("resolving mention {}", mention.id))?;
        }

        info!(%document_id, resolved = total, "entity resolution finished");
        Ok(total)
    }

    /// Resolve a single mention: exact lookup first, then the best
    /// fuzzy candidate at or above the threshold (earliest-created
    /// wins ties), else create a fresh canonical entity.
    pub async fn resolve_mention(
        &self,
        mention: &EntityMention,
        project_id: Uuid,
        pool: &PgPool,
    ) -> Result<ResolutionOutcome> {
        let normalized = similarity::normalize(&mention.surface_text, mention.entity_type);

        if let Some(exact) =
            CanonicalEntity::find_exact(project_id, mention.entity_type, &normalized, pool).await?
        {
            EntityMention::attach(
                mention.id,
                exact.id,
                ResolutionMethod::Exact,
                mention.confidence,
                pool,
            )
            .await?;
            CanonicalEntity::increment_mentions(exact.id, 1, pool).await?;

            return Ok(ResolutionOutcome {
                entity_id: exact.id,
                method: ResolutionMethod::Exact,
                score: 1.0,
            });
        }

        let candidates =
            CanonicalEntity::find_candidates(project_id, mention.entity_type, pool).await?;

        let mut best: Option<(&CanonicalEntity, f64)> = None;
        for candidate in &candidates {
            let mut score = similarity::match_score(&normalized, &candidate.normalized_name);
            if mention.entity_type == super::models::EntityType::Person
                && similarity::initials_match(&normalized, &candidate.normalized_name)
            {
                score = score.max(self.fuzzy_threshold);
            }

            // Candidates come back earliest-created first, so strict
            // greater-than keeps the oldest among equal scores.
            if score >= self.fuzzy_threshold
                && best.map_or(true, |(_, best_score)| score > best_score)
            {
                best = Some((candidate, score));
            }
        }

        if let Some((winner, score)) = best {
            debug!(
                mention = %mention.id,
                entity = %winner.id,
                score,
                "fuzzy match"
            );
            EntityMention::attach(
                mention.id,
                winner.id,
                ResolutionMethod::Fuzzy,
                mention.confidence * score,
                pool,
            )
            .await?;
            CanonicalEntity::increment_mentions(winner.id, 1, pool).await?;

            return Ok(ResolutionOutcome {
                entity_id: winner.id,
                method: ResolutionMethod::Fuzzy,
                score,
            });
        }

        let created =
            CanonicalEntity::create(project_id, &normalized, mention.entity_type, pool).await?;
        EntityMention::attach(
            mention.id,
            created.id,
            ResolutionMethod::Created,
            mention.confidence,
            pool,
        )
        .await?;

        Ok(ResolutionOutcome {
            entity_id: created.id,
            method: ResolutionMethod::Created,
            score: 1.0,
        })
    }

    /// Merge `source` into `target` atomically: mentions re-point,
    /// counts sum, the source keeps a tombstone pointer. Readers that
    /// hold the source id can still follow `merged_into` to the
    /// survivor.
    ///
    /// Both ids are resolved through their merge chains first, so a
    /// replay — or a merge phrased against an already-merged id — is a
    /// no-op returning `Ok(0)` once the two sides share a survivor.
    pub async fn merge_entities(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        pool: &PgPool,
    ) -> Result<u64> {
        let mut tx = pool.begin().await?;

        let live_source_id = live_id(&mut tx, source_id)
            .await?
            .context("merge source not found")?;
        let live_target_id = live_id(&mut tx, target_id)
            .await?
            .context("merge target not found")?;

        if live_source_id == live_target_id {
            return Ok(0);
        }

        let source = sqlx::query_as::<_, CanonicalEntity>(
            "SELECT * FROM canonical_entities WHERE id = $1 AND merged_into IS NULL FOR UPDATE",
        )
        .bind(live_source_id)
        .fetch_optional(&mut *tx)
        .await?
        .context("merge source changed concurrently")?;

        sqlx::query_as::<_, CanonicalEntity>(
            "SELECT * FROM canonical_entities WHERE id = $1 AND merged_into IS NULL FOR UPDATE",
        )
        .bind(live_target_id)
        .fetch_optional(&mut *tx)
        .await?
        .context("merge target changed concurrently")?;

        let moved = super::models::repoint_mentions(&mut tx, source.id, live_target_id).await?;

        sqlx::query(
            "UPDATE canonical_entities
             SET mention_count = mention_count + $2, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(live_target_id)
        .bind(source.mention_count)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE canonical_entities
             SET merged_into = $2, mention_count = 0, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(source.id)
        .bind(live_target_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            source_id = %source.id,
            target_id = %live_target_id,
            moved,
            "merged canonical entities"
        );
        Ok(moved)
    }

    /// Nominate near-duplicate live entities touched by a document and
    /// merge the pairs the extraction service confirms. The earlier-
    /// created entity survives, so the mapping is stable across replay
    /// order. Returns the number of merges performed.
    pub async fn sweep_merges(
        &self,
        document_id: Uuid,
        project_id: Uuid,
        extractor: &dyn BaseEntityExtractor,
        pool: &PgPool,
    ) -> Result<usize> {
        let mentions = EntityMention::find_by_document(document_id, pool).await?;
        let mut touched: Vec<Uuid> = mentions
            .iter()
            .filter_map(|m| m.canonical_entity_id)
            .collect();
        touched.sort();
        touched.dedup();

        let mut merged = 0usize;
        for id in touched {
            // An earlier pair in this sweep may have absorbed this one.
            let Some(entity) = CanonicalEntity::resolve_live(id, pool).await? else {
                continue;
            };

            let candidates =
                CanonicalEntity::find_candidates(project_id, entity.entity_type, pool).await?;

            let mut current = entity;
            for candidate in candidates {
                if candidate.id == current.id {
                    continue;
                }
                let score =
                    similarity::match_score(&current.normalized_name, &candidate.normalized_name);
                if score < MERGE_CANDIDATE_FLOOR {
                    continue;
                }

                let decision = extractor
                    .adjudicate_merge(
                        &current.normalized_name,
                        &candidate.normalized_name,
                        current.entity_type,
                    )
                    .await
                    .context("merge adjudication failed")?;
                if !decision.should_merge || decision.confidence < self.fuzzy_threshold {
                    continue;
                }

                // Earliest-created survives.
                let (source_id, target_id) = if candidate.created_at <= current.created_at {
                    (current.id, candidate.id)
                } else {
                    (candidate.id, current.id)
                };
                self.merge_entities(source_id, target_id, pool).await?;
                merged += 1;

                if source_id == current.id {
                    // Absorbed; remaining candidates belong to the
                    // survivor's next sweep.
                    break;
                }
            }
        }

        if merged > 0 {
            info!(%document_id, merged, "adjudicated entity merges");
        }
        Ok(merged)
    }
}

/// Follow the merge chain inside an open transaction. `Ok(None)` means
/// the starting id does not exist at all.
async fn live_id(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Option<Uuid>> {
    let mut current = id;
    loop {
        let row = sqlx::query_scalar::<_, Option<Uuid>>(
            "SELECT merged_into FROM canonical_entities WHERE id = $1",
        )
        .bind(current)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            None => return Ok(None),
            Some(None) => return Ok(Some(current)),
            Some(Some(next)) => current = next,
        }
    }
}
