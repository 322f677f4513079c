//! Resolve every mention to a canonical entity.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::documents::Document;
use crate::kernel::PipelineDeps;

pub async fn run(document: &Document, deps: &Arc<PipelineDeps>) -> Result<()> {
    // resolve_document only touches unresolved mentions, so a rerun
    // picks up exactly where an interrupted attempt stopped.
    let resolved = deps
        .resolution
        .resolve_document(document.id, document.project_id, &deps.db_pool)
        .await?;

    // Cross-document duplicates slip past per-mention resolution when
    // similar entities were created independently; the sweep sends
    // those pairs to the adjudicator. Merges are idempotent, so a
    // rerun converges on the same survivors.
    let merged = deps
        .resolution
        .sweep_merges(
            document.id,
            document.project_id,
            &*deps.extractor,
            &deps.db_pool,
        )
        .await?;

    info!(
        document_id = %document.id,
        resolved,
        merged,
        "entity resolution committed"
    );

    Ok(())
}
