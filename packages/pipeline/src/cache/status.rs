//! Cache-accelerated pipeline state: per-document status, completed-
//! stage markers for idempotent skip, and bounded result payloads.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::store::{get_json, set_json, CacheStore};
use crate::coordinator::Stage;
use crate::documents::DocumentStatus;

/// Payloads above this size are referenced, not cached inline, keeping
/// cache memory bounded.
const MAX_INLINE_BYTES: usize = 64 * 1024;

fn status_key(document_id: Uuid) -> String {
    format!("status:doc:{document_id}")
}

fn done_key(document_id: Uuid, stage: Stage) -> String {
    format!("done:doc:{}:{}", document_id, stage.queue_name())
}

fn result_key(document_id: Uuid, stage: Stage) -> String {
    format!("result:doc:{}:{}", document_id, stage.queue_name())
}

fn progress_key(batch_id: Uuid) -> String {
    format!("progress:batch:{batch_id}")
}

/// A stage result as cached: inline when small, otherwise a reference
/// into the object store.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachedResult {
    Inline(Value),
    Reference(String),
}

/// Handle over the shared cache for pipeline state.
///
/// Everything written here mirrors the durable store; a lost cache only
/// costs a re-read, never correctness.
#[derive(Clone)]
pub struct StateCache {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl StateCache {
    pub fn new(cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn store(&self) -> Arc<dyn CacheStore> {
        Arc::clone(&self.cache)
    }

    /// Whether a result of this encoded size caches inline; anything
    /// larger needs an object-store reference to be cached at all.
    pub fn fits_inline(&self, encoded_len: usize) -> bool {
        encoded_len <= MAX_INLINE_BYTES
    }

    pub async fn record_status(&self, document_id: Uuid, status: DocumentStatus) -> Result<()> {
        set_json(&*self.cache, &status_key(document_id), &status, self.ttl).await
    }

    pub async fn document_status(&self, document_id: Uuid) -> Result<Option<DocumentStatus>> {
        get_json(&*self.cache, &status_key(document_id)).await
    }

    pub async fn clear_status(&self, document_id: Uuid) -> Result<()> {
        self.cache.delete(&status_key(document_id)).await
    }

    /// Mark a stage completed for the fast idempotent-skip path.
    pub async fn mark_stage_completed(&self, document_id: Uuid, stage: Stage) -> Result<()> {
        self.cache
            .set_with_ttl(&done_key(document_id, stage), "1", self.ttl)
            .await
    }

    pub async fn is_stage_completed(&self, document_id: Uuid, stage: Stage) -> Result<bool> {
        Ok(self.cache.get(&done_key(document_id, stage)).await?.is_some())
    }

    /// Cache a stage result. Oversized inline payloads are stored as a
    /// reference when one is given, or skipped entirely — the durable
    /// store remains the source.
    pub async fn cache_result(
        &self,
        document_id: Uuid,
        stage: Stage,
        result: &Value,
        reference: Option<&str>,
    ) -> Result<()> {
        let encoded_len = serde_json::to_string(result)?.len();

        let cached = if encoded_len <= MAX_INLINE_BYTES {
            CachedResult::Inline(result.clone())
        } else if let Some(key) = reference {
            CachedResult::Reference(key.to_string())
        } else {
            debug!(
                document_id = %document_id,
                stage = %stage,
                size = encoded_len,
                "stage result too large to cache inline, skipping"
            );
            return Ok(());
        };

        set_json(&*self.cache, &result_key(document_id, stage), &cached, self.ttl).await
    }

    pub async fn cached_result(
        &self,
        document_id: Uuid,
        stage: Stage,
    ) -> Result<Option<CachedResult>> {
        get_json(&*self.cache, &result_key(document_id, stage)).await
    }

    /// Short-lived batch progress snapshot for the status API.
    pub async fn cache_batch_progress(&self, batch_id: Uuid, progress: &Value) -> Result<()> {
        set_json(
            &*self.cache,
            &progress_key(batch_id),
            progress,
            Duration::from_secs(5),
        )
        .await
    }

    pub async fn batch_progress(&self, batch_id: Uuid) -> Result<Option<Value>> {
        get_json(&*self.cache, &progress_key(batch_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;

    fn state_cache() -> StateCache {
        StateCache::new(Arc::new(InMemoryCacheStore::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn status_roundtrip() {
        let cache = state_cache();
        let doc = Uuid::new_v4();

        assert_eq!(cache.document_status(doc).await.unwrap(), None);

        cache
            .record_status(doc, DocumentStatus::Chunking)
            .await
            .unwrap();
        assert_eq!(
            cache.document_status(doc).await.unwrap(),
            Some(DocumentStatus::Chunking)
        );
    }

    #[tokio::test]
    async fn completed_marker_roundtrip() {
        let cache = state_cache();
        let doc = Uuid::new_v4();

        assert!(!cache.is_stage_completed(doc, Stage::Chunking).await.unwrap());
        cache.mark_stage_completed(doc, Stage::Chunking).await.unwrap();
        assert!(cache.is_stage_completed(doc, Stage::Chunking).await.unwrap());
        // Other stages are untouched.
        assert!(!cache
            .is_stage_completed(doc, Stage::EntityExtraction)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn small_results_cache_inline() {
        let cache = state_cache();
        let doc = Uuid::new_v4();
        let result = serde_json::json!({"chunks": 3});

        cache
            .cache_result(doc, Stage::Chunking, &result, None)
            .await
            .unwrap();

        match cache.cached_result(doc, Stage::Chunking).await.unwrap() {
            Some(CachedResult::Inline(v)) => assert_eq!(v, result),
            other => panic!("expected inline result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_results_cache_by_reference() {
        let cache = state_cache();
        let doc = Uuid::new_v4();
        let big = serde_json::json!({"text": "x".repeat(MAX_INLINE_BYTES + 1)});

        cache
            .cache_result(doc, Stage::TextExtraction, &big, Some("blobs/doc/text"))
            .await
            .unwrap();

        match cache.cached_result(doc, Stage::TextExtraction).await.unwrap() {
            Some(CachedResult::Reference(key)) => assert_eq!(key, "blobs/doc/text"),
            other => panic!("expected reference, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_results_without_reference_are_skipped() {
        let cache = state_cache();
        let doc = Uuid::new_v4();
        let big = serde_json::json!({"text": "x".repeat(MAX_INLINE_BYTES + 1)});

        cache
            .cache_result(doc, Stage::TextExtraction, &big, None)
            .await
            .unwrap();

        assert!(cache
            .cached_result(doc, Stage::TextExtraction)
            .await
            .unwrap()
            .is_none());
    }
}
