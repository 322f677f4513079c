//! End-to-end pipeline tests: documents flowing through all six
//! stages, retry audit trails, batch isolation, and redelivery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use test_context::test_context;
use uuid::Uuid;

use common::{drive_pipeline, TestHarness};
use pipeline_core::batches::{self, ManifestEntry};
use pipeline_core::cache::{CachedResult, StageLock};
use pipeline_core::coordinator::{self, Stage};
use pipeline_core::documents::{Chunk, Document, DocumentStatus};
use pipeline_core::error::PipelineError;
use pipeline_core::kernel::test_dependencies::{MockEntityExtractor, MockOcrProvider, ScriptedOcr};
use pipeline_core::kernel::PipelineTunables;
use pipeline_core::resolution::{EntityMention, EntityType};
use pipeline_core::tasks::{ProcessingTask, StageTaskSpec, TaskPriority, TaskStatus};

const SAMPLE_TEXT: &str = "Acme Corporation hired John Smith as chief engineer.";

fn standard_extractor() -> Arc<MockEntityExtractor> {
    Arc::new(
        MockEntityExtractor::new()
            .with_entity("John Smith", EntityType::Person)
            .with_entity("Acme Corporation", EntityType::Organization)
            .with_relationship("acme corporation", "john smith", "employs"),
    )
}

async fn submit_single(
    harness: &TestHarness,
    deps: &Arc<pipeline_core::kernel::PipelineDeps>,
) -> Uuid {
    let (_, document_ids) = batches::submit_batch(
        Uuid::new_v4(),
        TaskPriority::Normal,
        vec![ManifestEntry {
            object_key: "batch/doc-0.pdf".to_string(),
        }],
        deps,
    )
    .await
    .unwrap();

    let _ = harness;
    document_ids[0]
}

#[test_context(TestHarness)]
#[tokio::test]
async fn document_flows_through_all_stages(ctx: &mut TestHarness) {
    let ocr = Arc::new(MockOcrProvider::new().with_text(SAMPLE_TEXT));
    let extractor = standard_extractor();
    let deps = ctx.deps(ocr, extractor);

    let document_id = submit_single(ctx, &deps).await;
    drive_pipeline(&deps).await.unwrap();

    let document = Document::find_by_id(document_id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.status, DocumentStatus::Completed);
    assert!(document.extracted_text.is_some());
    assert!(document.text_sha256.is_some());

    assert!(Chunk::count_for_document(document_id, &ctx.db_pool).await.unwrap() >= 1);

    let mentions = EntityMention::find_by_document(document_id, &ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(mentions.len(), 2);
    for mention in &mentions {
        assert!(mention.canonical_entity_id.is_some());
        assert!(mention.resolution_method.is_some());
    }

    let relationships =
        pipeline_core::relationships::Relationship::find_by_document(document_id, &ctx.db_pool)
            .await
            .unwrap();
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships[0].relationship_type, "employs");

    // One completed task row per stage.
    for stage in Stage::ALL {
        let history = ProcessingTask::history(document_id, stage, &ctx.db_pool)
            .await
            .unwrap();
        assert_eq!(history.len(), 1, "stage {stage} should have one attempt");
        assert_eq!(history[0].status, TaskStatus::Completed);
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn transient_failures_leave_full_audit_trail(ctx: &mut TestHarness) {
    // OCR submit fails twice with a network error, then succeeds.
    let ocr = Arc::new(
        MockOcrProvider::new()
            .with_outcome(ScriptedOcr::FailSubmit(PipelineError::Network(
                "connection reset".to_string(),
            )))
            .with_outcome(ScriptedOcr::FailSubmit(PipelineError::Network(
                "connection reset".to_string(),
            )))
            .with_text(SAMPLE_TEXT),
    );
    let deps = ctx.deps(ocr, standard_extractor());

    let document_id = submit_single(ctx, &deps).await;
    drive_pipeline(&deps).await.unwrap();

    let document = Document::find_by_id(document_id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.status, DocumentStatus::Completed);

    // Two failed rows plus the completed retry, all preserved.
    let history = ProcessingTask::history(document_id, Stage::TextExtraction, &ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].status, TaskStatus::Failed);
    assert_eq!(history[0].error_class.as_deref(), Some("network"));
    assert_eq!(history[1].status, TaskStatus::Failed);
    assert_eq!(history[2].status, TaskStatus::Completed);
    assert_eq!(history[2].attempt, 3);

    // All three attempts chain back to the first row.
    let root = history[0].id;
    assert_eq!(history[1].root_task_id, Some(root));
    assert_eq!(history[2].root_task_id, Some(root));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn one_bad_document_does_not_poison_the_batch(ctx: &mut TestHarness) {
    // Five documents; the third has a corrupt scan the provider rejects.
    let ocr = Arc::new(
        MockOcrProvider::new()
            .with_text(SAMPLE_TEXT)
            .with_text(SAMPLE_TEXT)
            .with_outcome(ScriptedOcr::FailJob("unreadable scan".to_string()))
            .with_text(SAMPLE_TEXT)
            .with_text(SAMPLE_TEXT),
    );
    let deps = ctx.deps(ocr, standard_extractor());

    let manifest: Vec<ManifestEntry> = (0..5)
        .map(|i| ManifestEntry {
            object_key: format!("batch/doc-{i}.pdf"),
        })
        .collect();
    let (batch, document_ids) =
        batches::submit_batch(Uuid::new_v4(), TaskPriority::High, manifest, &deps)
            .await
            .unwrap();
    assert_eq!(document_ids.len(), 5);

    drive_pipeline(&deps).await.unwrap();

    let progress = batches::batch_progress(batch.id, &deps).await.unwrap();
    assert_eq!(progress.total, 5);
    assert_eq!(progress.completed, 4);
    assert_eq!(progress.failed, 1);
    assert!(progress.is_complete());

    let failed = Document::find_by_id(document_ids[2], &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, DocumentStatus::Failed);
    assert!(failed
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("unreadable scan"));

    // A data error is terminal: exactly one attempt, no retries.
    let history = ProcessingTask::history(document_ids[2], Stage::TextExtraction, &ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].error_class.as_deref(), Some("data"));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn redelivered_completed_stage_is_a_noop(ctx: &mut TestHarness) {
    let ocr = Arc::new(MockOcrProvider::new().with_text(SAMPLE_TEXT));
    let deps = ctx.deps(ocr, standard_extractor());

    let document_id = submit_single(ctx, &deps).await;
    drive_pipeline(&deps).await.unwrap();

    let chunks_before = Chunk::count_for_document(document_id, &ctx.db_pool)
        .await
        .unwrap();

    // Simulate a duplicate delivery of an already-finished stage.
    deps.queue
        .enqueue(StageTaskSpec::new(document_id, Stage::Chunking))
        .await
        .unwrap();
    drive_pipeline(&deps).await.unwrap();

    // No duplicate work and no spurious downstream tasks.
    let chunks_after = Chunk::count_for_document(document_id, &ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(chunks_before, chunks_after);

    let document = Document::find_by_id(document_id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.status, DocumentStatus::Completed);

    let extraction_history =
        ProcessingTask::history(document_id, Stage::EntityExtraction, &ctx.db_pool)
            .await
            .unwrap();
    assert_eq!(extraction_history.len(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn failed_document_can_be_resubmitted(ctx: &mut TestHarness) {
    let ocr = Arc::new(
        MockOcrProvider::new()
            .with_outcome(ScriptedOcr::FailJob("transient provider outage".to_string()))
            .with_text(SAMPLE_TEXT),
    );
    let deps = ctx.deps(ocr, standard_extractor());

    let document_id = submit_single(ctx, &deps).await;
    drive_pipeline(&deps).await.unwrap();

    let document = Document::find_by_id(document_id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.status, DocumentStatus::Failed);

    let resumed_from = coordinator::resubmit_document(document_id, None, &deps)
        .await
        .unwrap();
    assert_eq!(resumed_from, Stage::TextExtraction);

    drive_pipeline(&deps).await.unwrap();

    let document = Document::find_by_id(document_id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.status, DocumentStatus::Completed);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn circuit_breaker_stops_hammering_the_provider(ctx: &mut TestHarness) {
    // Provider always fails with a retryable error; breaker threshold 2
    // but six retries allowed. Without the breaker the provider would
    // see all seven attempts.
    let ocr = Arc::new(MockOcrProvider::new().with_outcome(ScriptedOcr::FailSubmit(
        PipelineError::Network("connection reset".to_string()),
    )));
    let tunables = PipelineTunables {
        circuit_breaker_threshold: 2,
        max_task_retries: 6,
        ..Default::default()
    };
    let deps = ctx.deps_with_tunables(ocr.clone(), standard_extractor(), tunables);

    let document_id = submit_single(ctx, &deps).await;
    drive_pipeline(&deps).await.unwrap();

    let document = Document::find_by_id(document_id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.status, DocumentStatus::Failed);

    // Only the attempts before the breaker tripped reached the provider.
    assert_eq!(ocr.submit_count(), 2);

    let history = ProcessingTask::history(document_id, Stage::TextExtraction, &ctx.db_pool)
        .await
        .unwrap();
    assert!(history
        .iter()
        .any(|t| t.error_class.as_deref() == Some("throttling")));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn oversized_extracted_text_is_spilled_to_the_object_store(ctx: &mut TestHarness) {
    // Big enough that the cached stage result cannot stay inline.
    let mut text = String::from("Acme Corporation hired John Smith as chief engineer. ");
    while text.len() <= 80 * 1024 {
        text.push_str("The quarterly filing restates the same staffing change. ");
    }
    let ocr = Arc::new(MockOcrProvider::new().with_text(&text));
    let deps = ctx.deps(ocr, standard_extractor());

    let document_id = submit_single(ctx, &deps).await;
    drive_pipeline(&deps).await.unwrap();

    let document = Document::find_by_id(document_id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.status, DocumentStatus::Completed);

    // The cache holds a reference into the object store, not the text.
    let cached = ctx
        .cache
        .cached_result(document_id, Stage::TextExtraction)
        .await
        .unwrap()
        .expect("text extraction result should be cached");
    let key = match cached {
        CachedResult::Reference(key) => key,
        CachedResult::Inline(_) => panic!("oversized result should be cached by reference"),
    };

    // Downstream stages still saw the full text.
    let chunks = Chunk::find_by_document(document_id, &ctx.db_pool)
        .await
        .unwrap();
    let covered: usize = chunks.iter().map(|c| c.text.len()).sum();
    assert_eq!(covered, text.len());

    // Finalization removed the interim blob.
    assert!(deps.object_store.get(&key).await.is_err());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn lock_contention_defers_without_spending_retries(ctx: &mut TestHarness) {
    let ocr = Arc::new(MockOcrProvider::new().with_text(SAMPLE_TEXT));
    let deps = ctx.deps(ocr, standard_extractor());

    let document_id = submit_single(ctx, &deps).await;

    // Another worker holds the stage lock for this document.
    let held = StageLock::acquire(
        ctx.cache.store(),
        document_id,
        Stage::TextExtraction,
        Duration::from_secs(60),
    )
    .await
    .unwrap()
    .expect("lock should start free");

    sqlx::query("UPDATE processing_tasks SET next_run_at = NOW() WHERE status = 'pending'")
        .execute(&ctx.db_pool)
        .await
        .unwrap();
    let mut tasks = deps.queue.claim(&Stage::ALL, "loser-worker", 1).await.unwrap();
    assert_eq!(tasks.len(), 1);
    let task = tasks.remove(0);
    let task_id = task.id;

    // Losing the race is not an error and must not charge the budget.
    coordinator::run_stage(task, deps.clone()).await.unwrap();

    let deferred = ProcessingTask::find_by_id(task_id, &ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(deferred.status, TaskStatus::Pending);
    assert_eq!(deferred.retry_count, 0);
    assert!(deferred.next_run_at.unwrap() > Utc::now());

    // The runner completes tasks after run_stage returns Ok; a deferred
    // task must stay pending through that call.
    deps.queue.mark_completed(task_id).await.unwrap();
    let still_pending = ProcessingTask::find_by_id(task_id, &ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(still_pending.status, TaskStatus::Pending);

    // Once the holder lets go, the redelivered task runs to completion.
    held.release().await.unwrap();
    drive_pipeline(&deps).await.unwrap();

    let document = Document::find_by_id(document_id, &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.status, DocumentStatus::Completed);

    let history = ProcessingTask::history(document_id, Stage::TextExtraction, &ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TaskStatus::Completed);
    assert_eq!(history[0].retry_count, 0);
}
