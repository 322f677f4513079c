//! PostgreSQL-backed stage task queue.
//!
//! One logical queue per stage over a single table; claiming filters by
//! stage so workers can be allocated per queue and per priority tier.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::task::{ProcessingTask, TaskPriority};
use crate::coordinator::{retry, Stage};
use crate::documents::Document;
use crate::error::Classified;

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone)]
pub enum EnqueueResult {
    /// Task was enqueued, returns new task ID
    Created(Uuid),
    /// Task already exists (idempotency hit), returns existing task ID
    Duplicate(Uuid),
}

impl EnqueueResult {
    /// Get the task ID regardless of whether it was created or duplicate
    pub fn task_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    /// Returns true if this was a newly created task
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// What to enqueue: a stage for a document, with minimal payload.
/// Large results are fetched by the next stage, never passed inline.
#[derive(Debug, Clone)]
pub struct StageTaskSpec {
    pub document_id: Uuid,
    pub stage: Stage,
    pub priority: TaskPriority,
    pub payload: Option<serde_json::Value>,
    pub max_retries: i32,
}

impl StageTaskSpec {
    pub fn new(document_id: Uuid, stage: Stage) -> Self {
        Self {
            document_id,
            stage,
            priority: TaskPriority::Normal,
            payload: None,
            max_retries: 3,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// One live task per (document, stage): the idempotency key dedupes
    /// concurrent submissions before the distributed lock ever engages.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.document_id, self.stage.queue_name())
    }
}

/// Trait for stage task queue operations.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a stage task. If a pending/in-progress task already
    /// exists for the same (document, stage), returns `Duplicate`.
    async fn enqueue(&self, spec: StageTaskSpec) -> Result<EnqueueResult>;

    /// Claim up to `limit` ready tasks for the given stages.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` for concurrent-safe claiming and
    /// recovers tasks whose lease expired.
    async fn claim(
        &self,
        stages: &[Stage],
        worker_id: &str,
        limit: i64,
    ) -> Result<Vec<ProcessingTask>>;

    /// Mark a task as successfully completed.
    async fn mark_completed(&self, task_id: Uuid) -> Result<()>;

    /// Mark a task as failed with a classified error.
    ///
    /// Retryable classes with retries remaining get a fresh backoff-
    /// scheduled row; otherwise the document is marked failed at this
    /// stage.
    async fn mark_failed(&self, task_id: Uuid, error: &str, classified: Classified) -> Result<()>;

    /// Put a claimed task back to pending, ready after `delay`, without
    /// spending a retry. Used when another worker holds the stage lock:
    /// the holder succeeding must never cost the loser its budget.
    async fn defer(&self, task_id: Uuid, delay: Duration) -> Result<()>;

    /// Extend the lease for a running task (heartbeat).
    async fn heartbeat(&self, task_id: Uuid) -> Result<()>;
}

/// PostgreSQL-backed task queue implementation.
pub struct PostgresTaskQueue {
    pool: PgPool,
    default_lease_ms: i64,
}

impl PostgresTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            default_lease_ms: 60_000, // 1 minute
        }
    }

    pub fn with_lease_duration(pool: PgPool, lease_ms: i64) -> Self {
        Self {
            pool,
            default_lease_ms: lease_ms,
        }
    }

    pub fn shared(pool: PgPool) -> Arc<dyn TaskQueue> {
        Arc::new(Self::new(pool))
    }

    /// Check if a live task with the given idempotency key exists.
    async fn find_live_by_idempotency_key(&self, key: &str) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM processing_tasks
             WHERE idempotency_key = $1
               AND status IN ('pending', 'in_progress')
             LIMIT 1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    async fn enqueue(&self, spec: StageTaskSpec) -> Result<EnqueueResult> {
        let key = spec.idempotency_key();

        if let Some(existing) = self.find_live_by_idempotency_key(&key).await? {
            return Ok(EnqueueResult::Duplicate(existing));
        }

        let builder = ProcessingTask::builder()
            .document_id(spec.document_id)
            .stage(spec.stage)
            .priority(spec.priority)
            .max_retries(spec.max_retries)
            .idempotency_key(key);
        let task = match spec.payload {
            Some(payload) => builder.payload(payload).build(),
            None => builder.build(),
        };

        let inserted = task.insert(&self.pool).await?;

        info!(
            task_id = %inserted.id,
            document_id = %inserted.document_id,
            stage = %inserted.stage,
            "enqueued stage task"
        );

        Ok(EnqueueResult::Created(inserted.id))
    }

    async fn claim(
        &self,
        stages: &[Stage],
        worker_id: &str,
        limit: i64,
    ) -> Result<Vec<ProcessingTask>> {
        ProcessingTask::claim(stages, worker_id, limit, self.default_lease_ms, &self.pool).await
    }

    async fn mark_completed(&self, task_id: Uuid) -> Result<()> {
        // Only an in-progress row completes; a deferred task has
        // already gone back to pending and must stay there.
        sqlx::query(
            "UPDATE processing_tasks
             SET status = 'completed',
                 lease_expires_at = NULL,
                 updated_at = NOW()
             WHERE id = $1 AND status = 'in_progress'",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, task_id: Uuid, error: &str, classified: Classified) -> Result<()> {
        let task = ProcessingTask::find_by_id(task_id, &self.pool).await?;

        // Record the failure on this attempt's row regardless of outcome.
        sqlx::query(
            "UPDATE processing_tasks
             SET status = 'failed',
                 error_message = $1,
                 error_class = $2,
                 lease_expires_at = NULL,
                 updated_at = NOW()
             WHERE id = $3",
        )
        .bind(error)
        .bind(classified.class)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if classified.retryable && task.retry_count < task.max_retries {
            let delay = retry::backoff_delay(task.retry_count, classified.backoff_multiplier);
            let retry_task = task.create_retry(Utc::now() + delay);
            retry_task.insert(&self.pool).await?;

            info!(
                task_id = %task_id,
                retry_task_id = %retry_task.id,
                retry_count = retry_task.retry_count,
                delay_ms = delay.num_milliseconds(),
                error_class = classified.class,
                "scheduled retry for failed task"
            );
        } else {
            // Retries exhausted or non-retryable: the document fails at
            // this stage and waits for review / resubmission.
            Document::mark_failed(task.document_id, error, &self.pool).await?;

            info!(
                task_id = %task_id,
                document_id = %task.document_id,
                stage = %task.stage,
                error_class = classified.class,
                "task failed terminally, document marked failed"
            );
        }

        Ok(())
    }

    async fn defer(&self, task_id: Uuid, delay: Duration) -> Result<()> {
        sqlx::query(
            "UPDATE processing_tasks
             SET status = 'pending',
                 worker_id = NULL,
                 lease_expires_at = NULL,
                 next_run_at = NOW() + make_interval(secs => $2),
                 updated_at = NOW()
             WHERE id = $1 AND status = 'in_progress'",
        )
        .bind(task_id)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn heartbeat(&self, task_id: Uuid) -> Result<()> {
        ProcessingTask::extend_lease(task_id, self.default_lease_ms, &self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_result_helpers() {
        let created = EnqueueResult::Created(Uuid::new_v4());
        assert!(created.is_created());

        let duplicate = EnqueueResult::Duplicate(Uuid::new_v4());
        assert!(!duplicate.is_created());
    }

    #[test]
    fn idempotency_key_is_stable_per_document_stage() {
        let id = Uuid::new_v4();
        let a = StageTaskSpec::new(id, Stage::Chunking).idempotency_key();
        let b = StageTaskSpec::new(id, Stage::Chunking).idempotency_key();
        assert_eq!(a, b);

        let other = StageTaskSpec::new(id, Stage::EntityExtraction).idempotency_key();
        assert_ne!(a, other);
    }
}
