//! Stage worker: polls for ready tasks and executes them.
//!
//! Workers coordinate solely through Postgres and Redis; there is no
//! shared memory between them. Each worker is allocated a set of stage
//! queues and a concurrency bound, so bulk low-priority load on one
//! queue cannot starve another worker's allocation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::queue::TaskQueue;
use super::registry::SharedStageRegistry;
use super::task::ProcessingTask;
use crate::coordinator::Stage;
use crate::error::{classify, PipelineError};
use crate::kernel::PipelineDeps;

/// Configuration for a stage worker.
#[derive(Debug, Clone)]
pub struct StageWorkerConfig {
    /// Stage queues this worker pulls from
    pub stages: Vec<Stage>,
    /// Maximum tasks in flight at once. Memory-heavy stages run with 1.
    pub concurrency: usize,
    /// Maximum number of tasks to claim at once
    pub batch_size: i64,
    /// How long to wait when no tasks are available
    pub poll_interval: Duration,
    /// How often to extend the lease of a running task
    pub heartbeat_interval: Duration,
    /// Soft limit: the task future is interrupted and the failure goes
    /// through the normal retry policy.
    pub soft_timeout: Duration,
    /// Hard limit: the task is aborted outright.
    pub hard_timeout: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl Default for StageWorkerConfig {
    fn default() -> Self {
        Self {
            stages: Stage::ALL.to_vec(),
            concurrency: 4,
            batch_size: 10,
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            soft_timeout: Duration::from_secs(240),
            hard_timeout: Duration::from_secs(300),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl StageWorkerConfig {
    /// Allocation for the given stages, respecting the memory-heavy
    /// concurrency rule.
    pub fn for_stages(stages: Vec<Stage>, concurrency: usize) -> Self {
        let concurrency = if stages.iter().any(|s| s.is_memory_heavy()) {
            1
        } else {
            concurrency
        };

        Self {
            stages,
            concurrency,
            ..Default::default()
        }
    }
}

/// Background service that processes stage tasks from the queue.
pub struct StageWorker {
    queue: Arc<dyn TaskQueue>,
    registry: SharedStageRegistry,
    deps: Arc<PipelineDeps>,
    config: StageWorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl StageWorker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        registry: SharedStageRegistry,
        deps: Arc<PipelineDeps>,
    ) -> Self {
        Self {
            queue,
            registry,
            deps,
            config: StageWorkerConfig::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_config(
        queue: Arc<dyn TaskQueue>,
        registry: SharedStageRegistry,
        deps: Arc<PipelineDeps>,
        config: StageWorkerConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            deps,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a shutdown handle for graceful shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run the worker until shutdown is requested.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            stages = ?self.config.stages.iter().map(|s| s.queue_name()).collect::<Vec<_>>(),
            concurrency = self.config.concurrency,
            "stage worker starting"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        loop {
            if self.is_shutdown_requested() {
                break;
            }

            let tasks = match self
                .queue
                .claim(
                    &self.config.stages,
                    &self.config.worker_id,
                    self.config.batch_size,
                )
                .await
            {
                Ok(tasks) => tasks,
                Err(e) => {
                    error!(error = %e, "failed to claim tasks");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if tasks.is_empty() {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            debug!(count = tasks.len(), "claimed tasks");

            let mut handles = Vec::with_capacity(tasks.len());
            for task in tasks {
                let permit = semaphore.clone().acquire_owned().await?;
                let worker = Arc::clone(&self);

                handles.push(tokio::spawn(async move {
                    worker.process_task(task).await;
                    drop(permit);
                }));
            }

            for handle in handles {
                let _ = handle.await;
            }
        }

        info!(worker_id = %self.config.worker_id, "stage worker stopped");
        Ok(())
    }

    /// Run until a shutdown signal is received.
    pub async fn run_until_shutdown(self: Arc<Self>) -> Result<()> {
        let shutdown = self.shutdown_handle();

        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            shutdown.store(true, Ordering::SeqCst);
        });

        self.run().await
    }

    /// Execute one claimed task and record the outcome. Every failure
    /// is classified and persisted; nothing is swallowed.
    pub async fn process_task(&self, task: ProcessingTask) {
        let task_id = task.id;
        let stage = task.stage;
        let document_id = task.document_id;

        debug!(task_id = %task_id, document_id = %document_id, stage = %stage, "executing task");

        let result = self.execute_with_limits(task).await;

        match result {
            Ok(()) => {
                info!(task_id = %task_id, document_id = %document_id, stage = %stage, "task completed");
                if let Err(e) = self.queue.mark_completed(task_id).await {
                    error!(task_id = %task_id, error = %e, "failed to mark task as completed");
                }
            }
            Err(e) => {
                let classified = classify(&e);
                warn!(
                    task_id = %task_id,
                    document_id = %document_id,
                    stage = %stage,
                    error = %e,
                    error_class = classified.class,
                    retryable = classified.retryable,
                    "task failed"
                );

                if let Err(mark_err) =
                    self.queue.mark_failed(task_id, &e.to_string(), classified).await
                {
                    error!(task_id = %task_id, error = %mark_err, "failed to mark task as failed");
                }
            }
        }
    }

    /// Run the stage handler under heartbeat and the two timeout tiers.
    async fn execute_with_limits(&self, task: ProcessingTask) -> Result<()> {
        let task_id = task.id;
        let queue = Arc::clone(&self.queue);
        let heartbeat_interval = self.config.heartbeat_interval;

        // Heartbeat keeps the lease alive while the handler runs.
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
        let heartbeat = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.tick().await; // skip the immediate first tick

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        if let Err(e) = queue.heartbeat(task_id).await {
                            warn!(task_id = %task_id, error = %e, "heartbeat failed");
                        }
                    }
                }
            }
        });

        let registry = Arc::clone(&self.registry);
        let deps = Arc::clone(&self.deps);
        let soft_timeout = self.config.soft_timeout;

        // Soft limit inside the spawned task: recoverable, retried.
        // Hard limit outside: the task is aborted.
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(soft_timeout, registry.execute(task, deps)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::Error::new(PipelineError::Network(format!(
                    "stage exceeded soft timeout of {}s",
                    soft_timeout.as_secs()
                )))),
            }
        });

        let result = match tokio::time::timeout(self.config.hard_timeout, handle).await {
            Ok(joined) => joined.unwrap_or_else(|e| Err(anyhow!("task panicked: {e}"))),
            Err(_) => Err(anyhow::Error::new(PipelineError::Network(format!(
                "stage exceeded hard timeout of {}s, aborted",
                self.config.hard_timeout.as_secs()
            )))),
        };

        let _ = stop_tx.send(());
        let _ = heartbeat.await;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = StageWorkerConfig::default();
        assert_eq!(config.batch_size, 10);
        assert!(config.worker_id.starts_with("worker-"));
        assert!(config.soft_timeout < config.hard_timeout);
    }

    #[test]
    fn memory_heavy_allocation_forces_concurrency_one() {
        let config = StageWorkerConfig::for_stages(vec![Stage::TextExtraction], 8);
        assert_eq!(config.concurrency, 1);

        let light = StageWorkerConfig::for_stages(vec![Stage::Chunking], 8);
        assert_eq!(light.concurrency, 8);
    }
}
