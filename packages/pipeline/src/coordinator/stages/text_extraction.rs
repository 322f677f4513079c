//! Text extraction via the OCR provider's submit/poll/fetch lifecycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordinator::Stage;
use crate::documents::Document;
use crate::error::PipelineError;
use crate::kernel::{OcrJobStatus, PipelineDeps};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: u32 = 150;

/// Object-store key for a document's extracted text, used when the
/// text is too large to mirror into the cache inline.
pub(super) fn extracted_text_key(document_id: Uuid) -> String {
    format!("derived/{document_id}/extracted_text.txt")
}

pub async fn run(document: &Document, deps: &Arc<PipelineDeps>) -> Result<()> {
    // A rerun after a crash between commit and chaining finds the text
    // already stored; skip the provider entirely.
    if document.extracted_text.is_some() && document.text_sha256.is_some() {
        info!(document_id = %document.id, "text already extracted, skipping provider");
        return Ok(());
    }

    let object_key = document.object_key.as_deref().ok_or_else(|| {
        PipelineError::Validation(format!("document {} has no object key", document.id))
    })?;

    let handle = deps
        .ocr
        .submit(object_key)
        .await
        .context("OCR submit failed")?;

    // Poll failures are transport problems, distinct from the job
    // itself failing: the former retries, the latter is a data error.
    let mut polls = 0;
    loop {
        match deps.ocr.poll(&handle).await {
            Ok(OcrJobStatus::Succeeded) => break,
            Ok(OcrJobStatus::Failed { reason }) => {
                return Err(PipelineError::Data(format!("OCR job failed: {reason}")).into());
            }
            Ok(OcrJobStatus::Pending) => {
                polls += 1;
                if polls >= MAX_POLLS {
                    return Err(PipelineError::Network(format!(
                        "OCR job {handle} still pending after {polls} polls"
                    ))
                    .into());
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Err(err) => {
                return Err(PipelineError::Network(format!("OCR poll failed: {err}")).into());
            }
        }
    }

    let result = deps.ocr.fetch(&handle).await.context("OCR fetch failed")?;

    if result.text.trim().is_empty() {
        return Err(PipelineError::Data(format!(
            "OCR produced no text for document {}",
            document.id
        ))
        .into());
    }

    let digest = hex::encode(Sha256::digest(result.text.as_bytes()));
    Document::set_extracted_text(
        document.id,
        &result.text,
        &digest,
        result.page_count,
        &deps.db_pool,
    )
    .await?;

    // Mirror the result into the cache for the next stage; text over
    // the inline ceiling is spilled to the object store and cached by
    // reference. Both mirrors are best-effort, the row is the truth.
    let payload = json!({
        "text": result.text,
        "pages": result.page_count,
        "sha256": digest,
    });
    let mut reference = None;
    if !deps.cache.fits_inline(serde_json::to_string(&payload)?.len()) {
        let key = extracted_text_key(document.id);
        match deps
            .object_store
            .put(&key, result.text.clone().into_bytes())
            .await
        {
            Ok(()) => reference = Some(key),
            Err(err) => {
                warn!(document_id = %document.id, error = %err, "failed to spill extracted text");
            }
        }
    }
    if let Err(err) = deps
        .cache
        .cache_result(
            document.id,
            Stage::TextExtraction,
            &payload,
            reference.as_deref(),
        )
        .await
    {
        warn!(document_id = %document.id, error = %err, "failed to cache extraction result");
    }

    info!(
        document_id = %document.id,
        pages = result.page_count,
        bytes = result.text.len(),
        "text extraction committed"
    );

    Ok(())
}
