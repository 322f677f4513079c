//! Stage registry mapping pipeline stages to their handlers.
//!
//! Workers claim tasks from the database and dispatch them through this
//! registry without knowing the concrete handler types.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::task::ProcessingTask;
use crate::coordinator::Stage;
use crate::kernel::PipelineDeps;

/// Type alias for the async handler function.
type BoxedHandler = Box<
    dyn Fn(ProcessingTask, Arc<PipelineDeps>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Registry that maps stages to handlers.
///
/// Each stage registers its handler at startup. When a worker claims a
/// task, it uses this registry to execute it.
#[derive(Default)]
pub struct StageRegistry {
    handlers: HashMap<Stage, BoxedHandler>,
}

/// Shared registry handle used by workers.
pub type SharedStageRegistry = Arc<StageRegistry>;

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a stage.
    pub fn register<F, Fut>(&mut self, stage: Stage, handler: F)
    where
        F: Fn(ProcessingTask, Arc<PipelineDeps>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let boxed: BoxedHandler = Box::new(move |task, deps| {
            let handler = handler.clone();
            Box::pin(async move { handler(task, deps).await })
        });

        self.handlers.insert(stage, boxed);
    }

    /// Execute a claimed task via its stage handler.
    pub async fn execute(&self, task: ProcessingTask, deps: Arc<PipelineDeps>) -> Result<()> {
        let handler = self
            .handlers
            .get(&task.stage)
            .ok_or_else(|| anyhow!("no handler registered for stage {}", task.stage))?;

        handler(task, deps).await
    }

    /// Stages with a registered handler.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages: Vec<Stage> = self.handlers.keys().copied().collect();
        stages.sort_by_key(|s| s.ordinal());
        stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_stages_are_ordered() {
        let mut registry = StageRegistry::new();
        registry.register(Stage::Chunking, |_task, _deps| async { Ok(()) });
        registry.register(Stage::TextExtraction, |_task, _deps| async { Ok(()) });

        assert_eq!(
            registry.stages(),
            vec![Stage::TextExtraction, Stage::Chunking]
        );
    }
}
