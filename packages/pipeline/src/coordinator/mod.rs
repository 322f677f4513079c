//! Stage coordination: the generic wrapper every stage task runs
//! through.
//!
//! The wrapper owns the cross-cutting ordering concerns — idempotent
//! skip, circuit breaking, precondition checks, the per-(document,
//! stage) lock, status advancement, and chaining the next stage — so
//! the stage handlers themselves only do their domain work.

pub mod circuit;
pub mod retry;
pub mod split;
pub mod stage;
pub mod stages;

pub use circuit::CircuitBreaker;
pub use stage::Stage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::StageLock;
use crate::documents::{Document, DocumentStatus};
use crate::error::{classify, PipelineError};
use crate::kernel::PipelineDeps;
use crate::tasks::{ProcessingTask, StageTaskSpec};

/// How long a tripped breaker stays open.
const CIRCUIT_WINDOW: Duration = Duration::from_secs(300);

/// How long a task waits after losing the stage-lock race. The holder
/// usually finishes inside this window and the retry becomes a skip.
const LOCK_DEFER_DELAY: Duration = Duration::from_secs(15);

/// Precondition reads tolerate replication lag: a freshly chained task
/// can land on a worker before the previous stage's write is visible.
const PRECONDITION_ATTEMPTS: u32 = 3;
const PRECONDITION_SPACING: Duration = Duration::from_secs(1);

fn breaker_for(deps: &PipelineDeps) -> CircuitBreaker {
    CircuitBreaker::new(
        deps.cache.store(),
        deps.tunables.circuit_breaker_threshold,
        CIRCUIT_WINDOW,
    )
}

/// The handler registered for every stage queue. Returns Err only for
/// failures the task machinery should classify and retry; skips and
/// no-ops return Ok.
pub async fn run_stage(task: ProcessingTask, deps: Arc<PipelineDeps>) -> Result<()> {
    let stage = task.stage;
    let document_id = task.document_id;

    // Fast skip: the cache remembers completed stages. A cache miss
    // falls through to the durable check below.
    if deps
        .cache
        .is_stage_completed(document_id, stage)
        .await
        .unwrap_or(false)
    {
        info!(%document_id, %stage, "stage already completed (cache), chaining next");
        chain_next(&task, &deps).await?;
        return Ok(());
    }

    let document = load_document_with_retry(document_id, &deps).await?;

    if document.status == DocumentStatus::Failed {
        warn!(%document_id, %stage, "document already failed, dropping task");
        return Ok(());
    }

    // Durable skip: a status past this stage means it committed, even
    // if the cache forgot.
    if document.status.ordinal() > DocumentStatus::of_stage(stage).ordinal() {
        deps.cache.mark_stage_completed(document_id, stage).await?;
        chain_next(&task, &deps).await?;
        return Ok(());
    }

    let breaker = breaker_for(&deps);
    if let Some(class) = breaker.open_class(document_id).await? {
        return Err(PipelineError::Throttling(format!(
            "circuit open for document {document_id} (class {class})"
        ))
        .into());
    }

    // One worker per (document, stage) at a time. Losing the race is
    // not a failure: the task goes back to pending with its retry
    // budget intact, and is redelivered after the holder finishes or
    // its TTL expires.
    let ttl = Duration::from_secs(deps.tunables.lock_ttl_secs);
    let lock = match StageLock::acquire(deps.cache.store(), document_id, stage, ttl).await? {
        Some(lock) => lock,
        None => {
            info!(%document_id, %stage, "stage lock held elsewhere, deferring");
            deps.queue.defer(task.id, LOCK_DEFER_DELAY).await?;
            return Ok(());
        }
    };

    let outcome = execute_locked(&task, &document, &deps).await;

    if !lock.release().await.unwrap_or(false) {
        // TTL expired mid-run. The work itself is guarded by the
        // monotonic status transition, so log and move on.
        warn!(%document_id, %stage, "stage lock expired before release");
    }

    match outcome {
        Ok(()) => {
            deps.cache.mark_stage_completed(document_id, stage).await?;
            chain_next(&task, &deps).await?;
            Ok(())
        }
        Err(err) => {
            let classified = classify(&err);
            breaker
                .record_failure(document_id, classified.class)
                .await?;
            Err(err)
        }
    }
}

/// The part of a stage run that happens under the lock: advance the
/// document's status, mirror it to the cache, run the handler.
async fn execute_locked(
    task: &ProcessingTask,
    document: &Document,
    deps: &Arc<PipelineDeps>,
) -> Result<()> {
    let stage = task.stage;

    if !Document::enter_stage(document.id, stage, &deps.db_pool).await? {
        // The guard refused: another worker advanced the document
        // between our read and this write. Reload and decide.
        let fresh = load_document_with_retry(document.id, deps).await?;
        if fresh.status.ordinal() > DocumentStatus::of_stage(stage).ordinal() {
            return Ok(());
        }
        return Err(PipelineError::Data(format!(
            "document {} in status {:?} cannot enter stage {stage}",
            document.id, fresh.status
        ))
        .into());
    }

    if let Err(err) = deps
        .cache
        .record_status(document.id, DocumentStatus::of_stage(stage))
        .await
    {
        // Cache mirror is best-effort; reconciliation repairs it.
        warn!(document_id = %document.id, error = %err, "failed to mirror status to cache");
    }

    stages::execute(stage, document, deps).await
}

/// Enqueue the successor stage with the same priority. Skipped when the
/// document has already moved past it (or finished), so redeliveries
/// chain at most once.
async fn chain_next(task: &ProcessingTask, deps: &Arc<PipelineDeps>) -> Result<()> {
    let Some(next) = task.stage.next() else {
        return Ok(());
    };

    if let Some(document) = Document::find_by_id(task.document_id, &deps.db_pool).await? {
        if document.status.ordinal() > DocumentStatus::of_stage(next).ordinal()
            || document.status == DocumentStatus::Failed
        {
            return Ok(());
        }
    }

    let spec = StageTaskSpec::new(task.document_id, next)
        .with_priority(task.priority)
        .with_max_retries(task.max_retries);
    let result = deps.queue.enqueue(spec).await?;

    if result.is_created() {
        info!(
            document_id = %task.document_id,
            from = %task.stage,
            to = %next,
            "chained next stage"
        );
    }

    Ok(())
}

/// Resubmit a failed document: rewind it to just before the stage that
/// failed, clear breaker and cache state, and enqueue that stage again.
/// Returns the stage the document will resume from.
pub async fn resubmit_document(
    document_id: Uuid,
    priority: Option<crate::tasks::TaskPriority>,
    deps: &Arc<PipelineDeps>,
) -> Result<Stage> {
    let document = Document::find_by_id(document_id, &deps.db_pool)
        .await?
        .ok_or_else(|| PipelineError::Validation(format!("document {document_id} not found")))?;

    if document.status != DocumentStatus::Failed {
        return Err(PipelineError::Validation(format!(
            "document {document_id} is {:?}, only failed documents can be resubmitted",
            document.status
        ))
        .into());
    }

    let stage = ProcessingTask::latest_failed_stage(document_id, &deps.db_pool)
        .await?
        .unwrap_or(Stage::TextExtraction);

    if !Document::reset_for_retry(document_id, stage, &deps.db_pool).await? {
        return Err(PipelineError::Validation(format!(
            "document {document_id} left the failed state during resubmission"
        ))
        .into());
    }

    breaker_for(deps).reset(document_id).await?;
    deps.cache.clear_status(document_id).await?;

    let spec = StageTaskSpec::new(document_id, stage)
        .with_priority(priority.unwrap_or_default())
        .with_max_retries(deps.tunables.max_task_retries);
    deps.queue.enqueue(spec).await?;

    info!(%document_id, %stage, "document resubmitted");
    Ok(stage)
}

async fn load_document_with_retry(
    document_id: Uuid,
    deps: &Arc<PipelineDeps>,
) -> Result<Document> {
    for attempt in 1..=PRECONDITION_ATTEMPTS {
        if let Some(document) = Document::find_by_id(document_id, &deps.db_pool).await? {
            return Ok(document);
        }
        if attempt < PRECONDITION_ATTEMPTS {
            tokio::time::sleep(PRECONDITION_SPACING).await;
        }
    }

    Err(PipelineError::Validation(format!("document {document_id} not found")).into())
}
