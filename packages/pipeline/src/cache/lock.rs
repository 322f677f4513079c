//! TTL-bounded distributed lock per (document, stage).
//!
//! Two workers must never execute the same (document, stage) pair at
//! once. A crashed holder frees the lock at TTL expiry — liveness is
//! preferred over strict exclusion. Release is token-checked so an
//! expired holder cannot free a successor's lock.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use uuid::Uuid;

use super::store::CacheStore;
use crate::coordinator::Stage;

fn lock_key(document_id: Uuid, stage: Stage) -> String {
    format!("lock:doc:{}:{}", document_id, stage.queue_name())
}

/// A held stage lock. Release explicitly with [`StageLock::release`];
/// otherwise the TTL frees it.
pub struct StageLock {
    cache: Arc<dyn CacheStore>,
    key: String,
    token: String,
}

impl StageLock {
    /// Try to acquire the lock for a (document, stage) pair.
    /// Returns `None` when another worker holds it.
    pub async fn acquire(
        cache: Arc<dyn CacheStore>,
        document_id: Uuid,
        stage: Stage,
        ttl: Duration,
    ) -> Result<Option<Self>> {
        let key = lock_key(document_id, stage);
        let token = Uuid::new_v4().to_string();

        if cache.set_nx_with_ttl(&key, &token, ttl).await? {
            Ok(Some(Self { cache, key, token }))
        } else {
            Ok(None)
        }
    }

    /// Release the lock if we still hold it. Returns false when the TTL
    /// already expired and someone else took over.
    pub async fn release(self) -> Result<bool> {
        self.cache.delete_if_equals(&self.key, &self.token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;

    #[tokio::test]
    async fn second_acquire_is_refused_until_release() {
        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let doc = Uuid::new_v4();
        let ttl = Duration::from_secs(30);

        let first = StageLock::acquire(cache.clone(), doc, Stage::Chunking, ttl)
            .await
            .unwrap()
            .expect("first acquire succeeds");

        assert!(StageLock::acquire(cache.clone(), doc, Stage::Chunking, ttl)
            .await
            .unwrap()
            .is_none());

        assert!(first.release().await.unwrap());

        assert!(StageLock::acquire(cache.clone(), doc, Stage::Chunking, ttl)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn locks_are_scoped_per_document_and_stage() {
        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let doc = Uuid::new_v4();
        let ttl = Duration::from_secs(30);

        let _held = StageLock::acquire(cache.clone(), doc, Stage::Chunking, ttl)
            .await
            .unwrap()
            .unwrap();

        // Other stage of the same document is free.
        assert!(
            StageLock::acquire(cache.clone(), doc, Stage::EntityExtraction, ttl)
                .await
                .unwrap()
                .is_some()
        );

        // Same stage of another document is free.
        assert!(
            StageLock::acquire(cache.clone(), Uuid::new_v4(), Stage::Chunking, ttl)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn crashed_holder_frees_at_ttl_expiry() {
        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let doc = Uuid::new_v4();

        let held = StageLock::acquire(
            cache.clone(),
            doc,
            Stage::Chunking,
            Duration::from_millis(5),
        )
        .await
        .unwrap()
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        // TTL expired: a new worker can acquire, and the stale holder's
        // release must not disturb it.
        let successor = StageLock::acquire(
            cache.clone(),
            doc,
            Stage::Chunking,
            Duration::from_secs(30),
        )
        .await
        .unwrap()
        .expect("lock freed by TTL");

        assert!(!held.release().await.unwrap());
        assert!(successor.release().await.unwrap());
    }
}
