//! Cache reconciliation: the database is truth, stale or missing
//! cache entries get repaired by the background sweep.

mod common;

use test_context::test_context;
use uuid::Uuid;

use common::TestHarness;
use pipeline_core::cache::reconcile_document_status;
use pipeline_core::documents::{Document, DocumentStatus};

#[test_context(TestHarness)]
#[tokio::test]
async fn stale_cached_status_is_repaired_from_the_database(ctx: &mut TestHarness) {
    let document = Document::create(Uuid::new_v4(), "recon/doc.pdf", &ctx.db_pool)
        .await
        .unwrap();

    // Poison the cache with a status the database never reached.
    ctx.cache
        .record_status(document.id, DocumentStatus::Completed)
        .await
        .unwrap();

    let repaired = reconcile_document_status(&ctx.db_pool, &ctx.cache)
        .await
        .unwrap();
    assert!(repaired >= 1);

    assert_eq!(
        ctx.cache.document_status(document.id).await.unwrap(),
        Some(DocumentStatus::Pending)
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn missing_cache_entry_is_backfilled(ctx: &mut TestHarness) {
    let document = Document::create(Uuid::new_v4(), "recon/doc2.pdf", &ctx.db_pool)
        .await
        .unwrap();

    assert!(ctx
        .cache
        .document_status(document.id)
        .await
        .unwrap()
        .is_none());

    reconcile_document_status(&ctx.db_pool, &ctx.cache)
        .await
        .unwrap();

    assert_eq!(
        ctx.cache.document_status(document.id).await.unwrap(),
        Some(DocumentStatus::Pending)
    );
}
