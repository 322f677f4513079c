//! Task queue and worker infrastructure for stage execution.
//!
//! - [`PostgresTaskQueue`] - database-backed per-stage queues
//! - [`StageWorker`] - long-running service that claims and executes tasks
//! - [`ProcessingTask`] - queue row and audit row in one
//! - [`StageRegistry`] - stage → handler dispatch
//!
//! Stage handlers live in the coordinator; this module only provides the
//! infrastructure.

mod queue;
mod registry;
mod runner;
mod task;

pub use queue::{EnqueueResult, PostgresTaskQueue, StageTaskSpec, TaskQueue};
pub use registry::{SharedStageRegistry, StageRegistry};
pub use runner::{StageWorker, StageWorkerConfig};
pub use task::{ProcessingTask, TaskPriority, TaskStatus};
