pub mod harness;

pub use harness::TestHarness;

use std::sync::Arc;

use anyhow::Result;
use pipeline_core::coordinator::{self, Stage};
use pipeline_core::error::classify;
use pipeline_core::kernel::PipelineDeps;

use pipeline_core::documents::{Chunk, Document, NewChunk};
use uuid::Uuid;

/// Seed a document with one chunk covering the given text, already
/// advanced to the given status.
pub async fn seed_document_with_chunk(
    pool: &sqlx::PgPool,
    status: &str,
    text: &str,
) -> Result<(Document, Chunk)> {
    let document = Document::create(Uuid::new_v4(), "seeded/doc.pdf", pool).await?;

    sqlx::query(&format!(
        "UPDATE documents SET status = '{status}', extracted_text = $2 WHERE id = $1"
    ))
    .bind(document.id)
    .bind(text)
    .execute(pool)
    .await?;

    let chunks = Chunk::create_all(
        document.id,
        &[NewChunk {
            chunk_index: 0,
            start_offset: 0,
            end_offset: text.len() as i32,
            text: text.to_string(),
        }],
        pool,
    )
    .await?;

    let document = Document::find_by_id(document.id, pool).await?.unwrap();
    Ok((document, chunks.into_iter().next().unwrap()))
}

/// Synchronous stand-in for the worker loop: claim ready tasks and run
/// them through the coordinator until the queues drain. Backoff
/// schedules are collapsed so retries run immediately.
pub async fn drive_pipeline(deps: &Arc<PipelineDeps>) -> Result<()> {
    for _ in 0..200 {
        sqlx::query("UPDATE processing_tasks SET next_run_at = NOW() WHERE status = 'pending'")
            .execute(&deps.db_pool)
            .await?;

        let mut tasks = deps.queue.claim(&Stage::ALL, "test-worker", 10).await?;
        if tasks.is_empty() {
            return Ok(());
        }
        // UPDATE .. RETURNING does not guarantee order; run in
        // submission order so scripted mocks line up with documents.
        tasks.sort_by_key(|t| t.created_at);

        for task in tasks {
            let task_id = task.id;
            match coordinator::run_stage(task, deps.clone()).await {
                Ok(()) => deps.queue.mark_completed(task_id).await?,
                Err(e) => {
                    let classified = classify(&e);
                    deps.queue
                        .mark_failed(task_id, &e.to_string(), classified)
                        .await?;
                }
            }
        }
    }

    anyhow::bail!("pipeline did not drain within the iteration budget")
}
