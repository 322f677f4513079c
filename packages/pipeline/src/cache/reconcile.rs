//! Background reconciliation: the durable store is truth, the cache is
//! an accelerator. This pass compares them and repairs drift.

use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use super::status::StateCache;
use crate::documents::DocumentStatus;

/// One reconciliation sweep over recently-updated documents.
///
/// Returns the number of repaired cache entries.
pub async fn reconcile_document_status(pool: &PgPool, cache: &StateCache) -> Result<u64> {
    let rows = sqlx::query_as::<_, (Uuid, DocumentStatus)>(
        "SELECT id, status FROM documents WHERE updated_at > NOW() - INTERVAL '1 hour'",
    )
    .fetch_all(pool)
    .await?;

    let mut repaired = 0u64;

    for (document_id, durable_status) in rows {
        let cached = cache.document_status(document_id).await?;

        if cached != Some(durable_status) {
            if let Some(stale) = cached {
                warn!(
                    document_id = %document_id,
                    cached = ?stale,
                    durable = ?durable_status,
                    "cache drift detected, repairing"
                );
            }
            cache.record_status(document_id, durable_status).await?;
            repaired += 1;
        }
    }

    Ok(repaired)
}

/// Interval-driven reconciliation loop, spawned at startup.
pub async fn run_reconciliation_loop(pool: PgPool, cache: StateCache, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        match reconcile_document_status(&pool, &cache).await {
            Ok(0) => {}
            Ok(repaired) => info!(repaired, "reconciliation pass repaired cache entries"),
            Err(e) => warn!(error = %e, "reconciliation pass failed"),
        }
    }
}
