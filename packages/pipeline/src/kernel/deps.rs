//! Pipeline dependencies for stage handlers (using traits for
//! testability).
//!
//! Every stage handler receives this container; all external services
//! sit behind trait abstractions so tests can swap in mocks.

use sqlx::PgPool;
use std::sync::Arc;

use crate::cache::StateCache;
use crate::kernel::{BaseEntityExtractor, BaseObjectStore, BaseOcrProvider};
use crate::resolution::ResolutionEngine;
use crate::tasks::TaskQueue;

/// Tunables the coordinator and stage handlers consult at runtime.
#[derive(Debug, Clone)]
pub struct PipelineTunables {
    pub fuzzy_match_threshold: f64,
    pub provider_input_ceiling: usize,
    pub lock_ttl_secs: u64,
    pub circuit_breaker_threshold: i64,
    pub max_task_retries: i32,
}

impl Default for PipelineTunables {
    fn default() -> Self {
        Self {
            fuzzy_match_threshold: 0.8,
            provider_input_ceiling: 500,
            lock_ttl_secs: 120,
            circuit_breaker_threshold: 5,
            max_task_retries: 3,
        }
    }
}

/// Dependencies accessible to stage handlers (using traits for
/// testability).
#[derive(Clone)]
pub struct PipelineDeps {
    pub db_pool: PgPool,
    pub cache: StateCache,
    pub queue: Arc<dyn TaskQueue>,
    pub ocr: Arc<dyn BaseOcrProvider>,
    pub extractor: Arc<dyn BaseEntityExtractor>,
    pub object_store: Arc<dyn BaseObjectStore>,
    pub resolution: Arc<ResolutionEngine>,
    pub tunables: PipelineTunables,
}

impl PipelineDeps {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: PgPool,
        cache: StateCache,
        queue: Arc<dyn TaskQueue>,
        ocr: Arc<dyn BaseOcrProvider>,
        extractor: Arc<dyn BaseEntityExtractor>,
        object_store: Arc<dyn BaseObjectStore>,
        resolution: Arc<ResolutionEngine>,
        tunables: PipelineTunables,
    ) -> Self {
        Self {
            db_pool,
            cache,
            queue,
            ocr,
            extractor,
            object_store,
            resolution,
            tunables,
        }
    }
}
