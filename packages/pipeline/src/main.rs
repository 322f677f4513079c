//! Pipeline server: HTTP intake API plus the stage worker pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeline_core::api::build_app;
use pipeline_core::cache::{run_reconciliation_loop, RedisCacheStore, StateCache};
use pipeline_core::coordinator::{self, Stage};
use pipeline_core::kernel::{PipelineDeps, PipelineTunables};
use pipeline_core::providers::{FsObjectStore, HttpOcrProvider, LlmEntityExtractor};
use pipeline_core::resolution::ResolutionEngine;
use pipeline_core::tasks::{PostgresTaskQueue, StageRegistry, StageWorker, StageWorkerConfig};
use pipeline_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pipeline_core=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    info!("starting document pipeline");

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let cache_store = Arc::new(
        RedisCacheStore::connect(&config.redis_url)
            .await
            .context("failed to connect to Redis")?,
    );
    let cache = StateCache::new(
        cache_store,
        Duration::from_secs(config.cache_ttl_secs),
    );

    let queue = PostgresTaskQueue::shared(pool.clone());

    let tunables = PipelineTunables {
        fuzzy_match_threshold: config.fuzzy_match_threshold,
        provider_input_ceiling: config.provider_input_ceiling,
        lock_ttl_secs: config.lock_ttl_secs,
        circuit_breaker_threshold: config.circuit_breaker_threshold,
        max_task_retries: config.max_task_retries,
    };

    let deps = Arc::new(PipelineDeps::new(
        pool.clone(),
        cache.clone(),
        queue.clone(),
        Arc::new(HttpOcrProvider::new(
            config.ocr_base_url.clone(),
            config.ocr_api_key.clone(),
        )?),
        Arc::new(LlmEntityExtractor::new(
            config.llm_base_url.clone(),
            config.llm_api_key.clone(),
        )?),
        Arc::new(FsObjectStore::new(config.object_store_root.clone())),
        Arc::new(ResolutionEngine::new(config.fuzzy_match_threshold)),
        tunables,
    ));

    // Every stage routes through the coordinator wrapper.
    let mut registry = StageRegistry::new();
    for stage in Stage::ALL {
        registry.register(stage, coordinator::run_stage);
    }
    let registry = Arc::new(registry);

    // Separate allocations: memory-heavy stages get their own worker
    // pinned to concurrency 1, the light stages share a pool.
    let heavy: Vec<Stage> = Stage::ALL.iter().copied().filter(Stage::is_memory_heavy).collect();
    let light: Vec<Stage> = Stage::ALL
        .iter()
        .copied()
        .filter(|s| !s.is_memory_heavy())
        .collect();

    let heavy_worker = Arc::new(StageWorker::with_config(
        queue.clone(),
        registry.clone(),
        deps.clone(),
        StageWorkerConfig::for_stages(heavy, config.heavy_stage_concurrency),
    ));
    let light_worker = Arc::new(StageWorker::with_config(
        queue.clone(),
        registry.clone(),
        deps.clone(),
        StageWorkerConfig::for_stages(light, config.light_stage_concurrency),
    ));

    let mut worker_handles = Vec::new();
    for worker in [heavy_worker.clone(), light_worker.clone()] {
        worker_handles.push(tokio::spawn(worker.run_until_shutdown()));
    }

    tokio::spawn(run_reconciliation_loop(
        pool.clone(),
        cache.clone(),
        Duration::from_secs(60),
    ));

    let app = build_app(deps);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .context("failed to bind listener")?;
    info!(port = config.port, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    heavy_worker.request_shutdown();
    light_worker.request_shutdown();
    for handle in worker_handles {
        let _ = handle.await;
    }

    info!("pipeline stopped");
    Ok(())
}
