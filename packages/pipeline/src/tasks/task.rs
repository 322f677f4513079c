//! Processing task model: one queue row per stage attempt.
//!
//! The same table is the audit log. Retries insert fresh rows chained by
//! `root_task_id` instead of rewriting the failed row, so the attempt
//! history survives verbatim.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::coordinator::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "task_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl TaskPriority {
    /// Convert to integer for ordering checks (lower = higher priority).
    /// The DB enum is declared in the same order, so `ORDER BY priority`
    /// agrees with this.
    pub fn as_i16(&self) -> i16 {
        match self {
            TaskPriority::High => 0,
            TaskPriority::Normal => 1,
            TaskPriority::Low => 2,
        }
    }
}

const TASK_COLUMNS: &str = "id, document_id, stage, status, priority, payload, attempt, \
     retry_count, max_retries, next_run_at, lease_expires_at, worker_id, \
     error_message, error_class, root_task_id, idempotency_key, created_at, updated_at";

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct ProcessingTask {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub document_id: Uuid,
    pub stage: Stage,

    #[builder(default)]
    pub status: TaskStatus,
    #[builder(default)]
    pub priority: TaskPriority,
    #[builder(default, setter(strip_option))]
    pub payload: Option<serde_json::Value>,

    #[builder(default = 1)]
    pub attempt: i32,
    #[builder(default = 0)]
    pub retry_count: i32,
    #[builder(default = 3)]
    pub max_retries: i32,

    #[builder(default, setter(strip_option))]
    pub next_run_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub worker_id: Option<String>,

    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,
    #[builder(default, setter(strip_option))]
    pub error_class: Option<String>,

    #[builder(default, setter(strip_option))]
    pub root_task_id: Option<Uuid>,
    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl ProcessingTask {
    /// Check if the task is ready to run.
    pub fn is_ready(&self) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }

        match self.next_run_at {
            None => true,
            Some(next_run) => next_run <= Utc::now(),
        }
    }

    /// Create the follow-up row for a retry of this task, scheduled for
    /// `scheduled_for`. The chain root stays stable across attempts.
    pub fn create_retry(&self, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id: self.document_id,
            stage: self.stage,
            status: TaskStatus::Pending,
            priority: self.priority,
            payload: self.payload.clone(),
            attempt: self.attempt + 1,
            retry_count: self.retry_count + 1,
            max_retries: self.max_retries,
            next_run_at: Some(scheduled_for),
            lease_expires_at: None,
            worker_id: None,
            error_message: None,
            error_class: None,
            root_task_id: self.root_task_id.or(Some(self.id)),
            idempotency_key: self.idempotency_key.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Self> {
        let task = sqlx::query_as::<_, Self>(&format!(
            "SELECT {TASK_COLUMNS} FROM processing_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(pool)
        .await?;

        Ok(task)
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<Self> {
        let task = sqlx::query_as::<_, Self>(&format!(
            "INSERT INTO processing_tasks (
                 id, document_id, stage, status, priority, payload, attempt,
                 retry_count, max_retries, next_run_at, lease_expires_at, worker_id,
                 error_message, error_class, root_task_id, idempotency_key,
                 created_at, updated_at
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(self.id)
        .bind(self.document_id)
        .bind(self.stage)
        .bind(self.status)
        .bind(self.priority)
        .bind(&self.payload)
        .bind(self.attempt)
        .bind(self.retry_count)
        .bind(self.max_retries)
        .bind(self.next_run_at)
        .bind(self.lease_expires_at)
        .bind(&self.worker_id)
        .bind(&self.error_message)
        .bind(&self.error_class)
        .bind(self.root_task_id)
        .bind(&self.idempotency_key)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(pool)
        .await?;

        Ok(task)
    }

    /// Claim tasks atomically using FOR UPDATE SKIP LOCKED.
    /// Also recovers stale tasks whose lease expired (crashed worker).
    pub async fn claim(
        stages: &[Stage],
        worker_id: &str,
        limit: i64,
        lease_ms: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let tasks = sqlx::query_as::<_, Self>(&format!(
            "WITH next_tasks AS (
                 SELECT id
                 FROM processing_tasks
                 WHERE stage = ANY($1)
                   AND (
                       (status = 'pending' AND (next_run_at IS NULL OR next_run_at <= NOW()))
                       OR (status = 'in_progress' AND lease_expires_at < NOW())
                   )
                 ORDER BY priority, COALESCE(next_run_at, created_at)
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE processing_tasks
             SET status = 'in_progress',
                 lease_expires_at = NOW() + ($3 || ' milliseconds')::INTERVAL,
                 worker_id = $4,
                 updated_at = NOW()
             WHERE id IN (SELECT id FROM next_tasks)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(stages)
        .bind(limit)
        .bind(lease_ms.to_string())
        .bind(worker_id)
        .fetch_all(pool)
        .await?;

        Ok(tasks)
    }

    /// Extend the lease for a running task (heartbeat).
    pub async fn extend_lease(id: Uuid, lease_ms: i64, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE processing_tasks
             SET lease_expires_at = NOW() + ($1 || ' milliseconds')::INTERVAL,
                 updated_at = NOW()
             WHERE id = $2 AND status = 'in_progress'",
        )
        .bind(lease_ms.to_string())
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Every task row for a document across all stages, oldest first.
    pub async fn find_by_document(document_id: Uuid, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {TASK_COLUMNS} FROM processing_tasks
             WHERE document_id = $1
             ORDER BY created_at ASC"
        ))
        .bind(document_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// The stage of the most recent failed task for a document — where
    /// a resubmission should restart.
    pub async fn latest_failed_stage(document_id: Uuid, pool: &PgPool) -> Result<Option<Stage>> {
        sqlx::query_scalar::<_, Stage>(
            "SELECT stage FROM processing_tasks
             WHERE document_id = $1 AND status = 'failed'
             ORDER BY updated_at DESC
             LIMIT 1",
        )
        .bind(document_id)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// Full audit history for a (document, stage), oldest first.
    pub async fn history(document_id: Uuid, stage: Stage, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {TASK_COLUMNS} FROM processing_tasks
             WHERE document_id = $1 AND stage = $2
             ORDER BY created_at ASC"
        ))
        .bind(document_id)
        .bind(stage)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> ProcessingTask {
        ProcessingTask::builder()
            .document_id(Uuid::new_v4())
            .stage(Stage::TextExtraction)
            .build()
    }

    #[test]
    fn new_task_starts_pending_with_defaults() {
        let task = sample_task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::Normal);
        assert_eq!(task.attempt, 1);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.max_retries, 3);
    }

    #[test]
    fn is_ready_for_unscheduled_pending_task() {
        assert!(sample_task().is_ready());
    }

    #[test]
    fn is_ready_false_for_future_schedule() {
        let mut task = sample_task();
        task.next_run_at = Some(Utc::now() + chrono::Duration::hours(1));
        assert!(!task.is_ready());
    }

    #[test]
    fn is_ready_false_when_in_progress() {
        let mut task = sample_task();
        task.status = TaskStatus::InProgress;
        assert!(!task.is_ready());
    }

    #[test]
    fn retry_chains_to_root_and_bumps_attempt() {
        let task = sample_task();
        let retry = task.create_retry(Utc::now());
        assert_eq!(retry.root_task_id, Some(task.id));
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.status, TaskStatus::Pending);

        let second = retry.create_retry(Utc::now());
        assert_eq!(second.root_task_id, Some(task.id));
        assert_eq!(second.attempt, 3);
    }

    #[test]
    fn priority_ordering_is_correct() {
        assert!(TaskPriority::High.as_i16() < TaskPriority::Normal.as_i16());
        assert!(TaskPriority::Normal.as_i16() < TaskPriority::Low.as_i16());
    }
}
