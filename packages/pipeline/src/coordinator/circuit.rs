//! Per-document circuit breaker keyed by failure class.
//!
//! Repeated failures of the same class on one document trip the
//! breaker; further stage attempts for that document are refused until
//! the window expires. Counts live in the cache so all workers see the
//! same breaker state, and a lost cache merely resets the counts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::error::ERROR_CLASSES;

fn breaker_key(document_id: Uuid, class: &str) -> String {
    format!("circuit:doc:{document_id}:{class}")
}

#[derive(Clone)]
pub struct CircuitBreaker {
    cache: Arc<dyn CacheStore>,
    threshold: i64,
    window: Duration,
}

impl CircuitBreaker {
    pub fn new(cache: Arc<dyn CacheStore>, threshold: i64, window: Duration) -> Self {
        Self {
            cache,
            threshold,
            window,
        }
    }

    /// Count a failure of the given class against the document.
    /// Returns true when this failure tripped the breaker.
    pub async fn record_failure(&self, document_id: Uuid, class: &str) -> Result<bool> {
        let count = self
            .cache
            .incr_with_ttl(&breaker_key(document_id, class), self.window)
            .await?;

        if count == self.threshold {
            warn!(
                %document_id,
                class,
                count,
                "circuit breaker tripped"
            );
        }

        Ok(count >= self.threshold)
    }

    /// The failure class whose breaker is currently open for this
    /// document, if any.
    pub async fn open_class(&self, document_id: Uuid) -> Result<Option<&'static str>> {
        for class in ERROR_CLASSES {
            if let Some(raw) = self.cache.get(&breaker_key(document_id, class)).await? {
                if raw.parse::<i64>().unwrap_or(0) >= self.threshold {
                    return Ok(Some(class));
                }
            }
        }

        Ok(None)
    }

    /// Clear all breaker state for a document, e.g. on resubmission.
    pub async fn reset(&self, document_id: Uuid) -> Result<()> {
        for class in ERROR_CLASSES {
            self.cache.delete(&breaker_key(document_id, class)).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;

    fn breaker(threshold: i64) -> CircuitBreaker {
        CircuitBreaker::new(
            Arc::new(InMemoryCacheStore::new()),
            threshold,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn trips_only_at_threshold() {
        let breaker = breaker(3);
        let doc = Uuid::new_v4();

        assert!(!breaker.record_failure(doc, "network").await.unwrap());
        assert!(!breaker.record_failure(doc, "network").await.unwrap());
        assert!(breaker.record_failure(doc, "network").await.unwrap());
        assert_eq!(breaker.open_class(doc).await.unwrap(), Some("network"));
    }

    #[tokio::test]
    async fn classes_are_counted_independently() {
        let breaker = breaker(2);
        let doc = Uuid::new_v4();

        breaker.record_failure(doc, "network").await.unwrap();
        breaker.record_failure(doc, "throttling").await.unwrap();

        // One failure each: neither class is open.
        assert_eq!(breaker.open_class(doc).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reset_closes_the_breaker() {
        let breaker = breaker(1);
        let doc = Uuid::new_v4();

        breaker.record_failure(doc, "data").await.unwrap();
        assert!(breaker.open_class(doc).await.unwrap().is_some());

        breaker.reset(doc).await.unwrap();
        assert_eq!(breaker.open_class(doc).await.unwrap(), None);
    }
}
