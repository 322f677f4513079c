// Trait definitions for dependency injection.
//
// These are INFRASTRUCTURE traits only - no pipeline logic. Stage
// handlers are plain functions that use these traits through
// PipelineDeps.
//
// Naming convention: Base* for trait names (e.g., BaseOcrProvider).

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::resolution::EntityType;

// =============================================================================
// OCR Provider (Infrastructure - asynchronous text extraction service)
// =============================================================================

/// State of a submitted OCR job as the provider reports it.
#[derive(Debug, Clone, PartialEq)]
pub enum OcrJobStatus {
    Pending,
    Succeeded,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    pub text: String,
    pub page_count: i32,
    /// Per-page confidence reported by the provider, when available.
    pub page_confidences: Vec<f64>,
}

/// Remote OCR service with a submit/poll/fetch lifecycle.
///
/// Submit and fetch failures are extraction failures; poll failures are
/// transient transport problems and should be classified as such by the
/// caller rather than failing the extraction outright.
#[async_trait]
pub trait BaseOcrProvider: Send + Sync {
    /// Submit a stored document for extraction, returning an opaque
    /// provider job handle.
    async fn submit(&self, object_key: &str) -> Result<String>;

    /// Check on a previously submitted job.
    async fn poll(&self, job_handle: &str) -> Result<OcrJobStatus>;

    /// Fetch the result of a succeeded job.
    async fn fetch(&self, job_handle: &str) -> Result<OcrResult>;
}

// =============================================================================
// Entity Extractor (Infrastructure - LLM-backed extraction calls)
// =============================================================================

/// A raw entity occurrence as the extractor reports it, before any
/// resolution. Offsets index into the chunk text it was extracted from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub surface_text: String,
    pub entity_type: EntityType,
    pub start_offset: i32,
    pub end_offset: i32,
    pub confidence: f64,
}

/// A relationship between two entities named by their normalized names,
/// with the supporting text span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub source_name: String,
    pub target_name: String,
    pub relationship_type: String,
    pub confidence: f64,
    pub evidence: Option<String>,
}

/// Verdict on whether two canonical names denote the same real-world
/// entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeDecision {
    pub should_merge: bool,
    pub confidence: f64,
}

#[async_trait]
pub trait BaseEntityExtractor: Send + Sync {
    /// Extract entity mentions from a span of text.
    async fn extract_entities(&self, text: &str) -> Result<Vec<ExtractedEntity>>;

    /// Extract relationships among the given entity names from the
    /// supporting text.
    async fn extract_relationships(
        &self,
        text: &str,
        entity_names: &[String],
    ) -> Result<Vec<ExtractedRelationship>>;

    /// Adjudicate whether two similarly-named entities of the same type
    /// should merge.
    async fn adjudicate_merge(
        &self,
        left_name: &str,
        right_name: &str,
        entity_type: EntityType,
    ) -> Result<MergeDecision>;
}

// =============================================================================
// Object Store (Infrastructure - blob storage for documents and results)
// =============================================================================

#[async_trait]
pub trait BaseObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete(&self, key: &str) -> Result<()>;
}
