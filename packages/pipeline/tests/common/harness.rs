//! Test harness with testcontainers for integration testing.
//!
//! Containers and migrations are initialized once on the first test and
//! shared across the whole run; each test gets a fresh pool and fresh
//! document ids for isolation.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

use pipeline_core::cache::{RedisCacheStore, StateCache};
use pipeline_core::kernel::test_dependencies::{
    InMemoryObjectStore, MockEntityExtractor, MockOcrProvider,
};
use pipeline_core::kernel::{
    BaseEntityExtractor, BaseOcrProvider, PipelineDeps, PipelineTunables,
};
use pipeline_core::resolution::ResolutionEngine;
use pipeline_core::tasks::PostgresTaskQueue;

struct SharedTestInfra {
    db_url: String,
    redis_url: String,
    // Keep containers alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
    _redis: ContainerAsync<Redis>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgresql://postgres:postgres@{pg_host}:{pg_port}/postgres");

        let redis = Redis::default()
            .start()
            .await
            .context("Failed to start Redis container")?;

        let redis_host = redis.get_host().await?;
        let redis_port = redis.get_host_port_ipv4(6379).await?;
        let redis_url = format!("redis://{redis_host}:{redis_port}");

        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            redis_url,
            _postgres: postgres,
            _redis: redis,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Per-test harness over the shared containers.
pub struct TestHarness {
    pub db_pool: PgPool,
    pub cache: StateCache,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {}
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .context("Failed to connect to test database")?;

        let store = RedisCacheStore::connect(&infra.redis_url)
            .await
            .context("Failed to connect to test Redis")?;
        let cache = StateCache::new(Arc::new(store), Duration::from_secs(3600));

        Ok(Self { db_pool, cache })
    }

    /// Wire up pipeline dependencies around the given provider mocks.
    pub fn deps(
        &self,
        ocr: Arc<MockOcrProvider>,
        extractor: Arc<MockEntityExtractor>,
    ) -> Arc<PipelineDeps> {
        self.deps_with_tunables(ocr, extractor, PipelineTunables::default())
    }

    pub fn deps_with_tunables(
        &self,
        ocr: Arc<MockOcrProvider>,
        extractor: Arc<MockEntityExtractor>,
        tunables: PipelineTunables,
    ) -> Arc<PipelineDeps> {
        let threshold = tunables.fuzzy_match_threshold;
        Arc::new(PipelineDeps::new(
            self.db_pool.clone(),
            self.cache.clone(),
            PostgresTaskQueue::shared(self.db_pool.clone()),
            ocr as Arc<dyn BaseOcrProvider>,
            extractor as Arc<dyn BaseEntityExtractor>,
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(ResolutionEngine::new(threshold)),
            tunables,
        ))
    }
}
