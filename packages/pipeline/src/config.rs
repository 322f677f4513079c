use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,
    pub ocr_base_url: String,
    pub ocr_api_key: String,
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub object_store_root: String,

    // Pipeline tunables. Business decisions, deliberately not hard-coded.
    pub fuzzy_match_threshold: f64,
    pub provider_input_ceiling: usize,
    pub lock_ttl_secs: u64,
    pub cache_ttl_secs: u64,
    pub circuit_breaker_threshold: i64,
    pub max_task_retries: i32,
    pub heavy_stage_concurrency: usize,
    pub light_stage_concurrency: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            ocr_base_url: env::var("OCR_BASE_URL").context("OCR_BASE_URL must be set")?,
            ocr_api_key: env::var("OCR_API_KEY").context("OCR_API_KEY must be set")?,
            llm_base_url: env::var("LLM_BASE_URL").context("LLM_BASE_URL must be set")?,
            llm_api_key: env::var("LLM_API_KEY").context("LLM_API_KEY must be set")?,
            object_store_root: env::var("OBJECT_STORE_ROOT")
                .unwrap_or_else(|_| "/var/lib/pipeline/objects".to_string()),
            fuzzy_match_threshold: env::var("FUZZY_MATCH_THRESHOLD")
                .unwrap_or_else(|_| "0.8".to_string())
                .parse()
                .context("FUZZY_MATCH_THRESHOLD must be a valid float")?,
            provider_input_ceiling: env::var("PROVIDER_INPUT_CEILING")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .context("PROVIDER_INPUT_CEILING must be a valid number")?,
            lock_ttl_secs: env::var("LOCK_TTL_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .context("LOCK_TTL_SECS must be a valid number")?,
            cache_ttl_secs: env::var("CACHE_TTL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("CACHE_TTL_SECS must be a valid number")?,
            circuit_breaker_threshold: env::var("CIRCUIT_BREAKER_THRESHOLD")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("CIRCUIT_BREAKER_THRESHOLD must be a valid number")?,
            max_task_retries: env::var("MAX_TASK_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("MAX_TASK_RETRIES must be a valid number")?,
            heavy_stage_concurrency: env::var("HEAVY_STAGE_CONCURRENCY")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("HEAVY_STAGE_CONCURRENCY must be a valid number")?,
            light_stage_concurrency: env::var("LIGHT_STAGE_CONCURRENCY")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("LIGHT_STAGE_CONCURRENCY must be a valid number")?,
        }
        .validated()
    }

    /// Range checks a parse alone cannot catch.
    fn validated(self) -> Result<Self> {
        anyhow::ensure!(
            self.provider_input_ceiling > 0,
            "PROVIDER_INPUT_CEILING must be at least 1"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.fuzzy_match_threshold),
            "FUZZY_MATCH_THRESHOLD must be between 0.0 and 1.0"
        );
        anyhow::ensure!(
            self.max_task_retries >= 0,
            "MAX_TASK_RETRIES must not be negative"
        );
        Ok(self)
    }
}
