//! Split extracted text into ordered, gap-free chunks.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::cache::CachedResult;
use crate::coordinator::Stage;
use crate::documents::{chunk_text, Chunk, Document};
use crate::error::PipelineError;
use crate::kernel::PipelineDeps;

/// Chunks are sized for downstream extraction calls; the oversized-
/// input splitter handles anything still over the provider ceiling.
const CHUNK_MAX_BYTES: usize = 4000;

pub async fn run(document: &Document, deps: &Arc<PipelineDeps>) -> Result<()> {
    let pool = &deps.db_pool;

    // Chunks committed by an interrupted earlier attempt are final.
    if Chunk::count_for_document(document.id, pool).await? > 0 {
        info!(document_id = %document.id, "chunks already exist, skipping");
        return Ok(());
    }

    let cached = cached_text(document, deps).await;
    let text = cached
        .as_deref()
        .or(document.extracted_text.as_deref())
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| {
            PipelineError::Data(format!("document {} has no extracted text", document.id))
        })?;

    let chunks = chunk_text(text, CHUNK_MAX_BYTES);
    if chunks.is_empty() {
        return Err(PipelineError::Data(format!(
            "document {} chunked to nothing",
            document.id
        ))
        .into());
    }

    let created = Chunk::create_all(document.id, &chunks, pool).await?;

    info!(
        document_id = %document.id,
        chunks = created.len(),
        "chunking committed"
    );

    Ok(())
}

/// Extracted text as the cache carries it: inline, or spilled to the
/// object store when oversized. Any miss or failure here just means
/// reading the document row instead.
async fn cached_text(document: &Document, deps: &Arc<PipelineDeps>) -> Option<String> {
    let cached = deps
        .cache
        .cached_result(document.id, Stage::TextExtraction)
        .await;

    match cached {
        Ok(Some(CachedResult::Inline(value))) => value
            .get("text")
            .and_then(|t| t.as_str())
            .map(str::to_string),
        Ok(Some(CachedResult::Reference(key))) => {
            match deps.object_store.get(&key).await {
                Ok(bytes) => String::from_utf8(bytes).ok(),
                Err(err) => {
                    warn!(document_id = %document.id, error = %err, "cached text reference unreadable");
                    None
                }
            }
        }
        Ok(None) => None,
        Err(err) => {
            warn!(document_id = %document.id, error = %err, "failed to read cached extraction result");
            None
        }
    }
}
