// Mock implementations for testing.
//
// Compiled into the library (not cfg(test)) so integration tests under
// tests/ can inject them into PipelineDeps.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{
    BaseEntityExtractor, BaseObjectStore, BaseOcrProvider, ExtractedEntity, ExtractedRelationship,
    MergeDecision, OcrJobStatus, OcrResult,
};
use crate::error::PipelineError;

// =============================================================================
// Mock OCR Provider
// =============================================================================

/// One scripted outcome for a submit call.
#[derive(Clone)]
pub enum ScriptedOcr {
    Succeed(OcrResult),
    /// Fail the submit itself with the given error.
    FailSubmit(PipelineError),
    /// Accept the submit, then report failure on poll.
    FailJob(String),
}

pub struct MockOcrProvider {
    script: Mutex<Vec<ScriptedOcr>>,
    jobs: Mutex<HashMap<String, ScriptedOcr>>,
    submit_calls: Mutex<Vec<String>>,
    counter: Mutex<u64>,
}

impl MockOcrProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            jobs: Mutex::new(HashMap::new()),
            submit_calls: Mutex::new(Vec::new()),
            counter: Mutex::new(0),
        }
    }

    /// Queue an outcome; submits consume outcomes in order. When the
    /// script runs dry, submits succeed with the last queued result
    /// (or a default one).
    pub fn with_outcome(self, outcome: ScriptedOcr) -> Self {
        self.script.lock().unwrap().push(outcome);
        self
    }

    pub fn with_text(self, text: &str) -> Self {
        self.with_outcome(ScriptedOcr::Succeed(OcrResult {
            text: text.to_string(),
            page_count: 1,
            page_confidences: vec![0.99],
        }))
    }

    pub fn submit_count(&self) -> usize {
        self.submit_calls.lock().unwrap().len()
    }
}

impl Default for MockOcrProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseOcrProvider for MockOcrProvider {
    async fn submit(&self, object_key: &str) -> Result<String> {
        self.submit_calls.lock().unwrap().push(object_key.to_string());

        let mut script = self.script.lock().unwrap();
        let outcome = if script.len() > 1 {
            script.remove(0)
        } else if let Some(last) = script.first() {
            last.clone()
        } else {
            ScriptedOcr::Succeed(OcrResult {
                text: format!("extracted text for {object_key}"),
                page_count: 1,
                page_confidences: vec![0.99],
            })
        };

        if let ScriptedOcr::FailSubmit(err) = outcome {
            return Err(err.into());
        }

        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        let handle = format!("ocr-job-{}", *counter);
        self.jobs.lock().unwrap().insert(handle.clone(), outcome);
        Ok(handle)
    }

    async fn poll(&self, job_handle: &str) -> Result<OcrJobStatus> {
        let jobs = self.jobs.lock().unwrap();
        match jobs.get(job_handle) {
            Some(ScriptedOcr::Succeed(_)) => Ok(OcrJobStatus::Succeeded),
            Some(ScriptedOcr::FailJob(reason)) => Ok(OcrJobStatus::Failed {
                reason: reason.clone(),
            }),
            Some(ScriptedOcr::FailSubmit(_)) | None => {
                Err(PipelineError::Data(format!("unknown OCR job {job_handle}")).into())
            }
        }
    }

    async fn fetch(&self, job_handle: &str) -> Result<OcrResult> {
        let jobs = self.jobs.lock().unwrap();
        match jobs.get(job_handle) {
            Some(ScriptedOcr::Succeed(result)) => Ok(result.clone()),
            _ => Err(PipelineError::Data(format!(
                "no result available for OCR job {job_handle}"
            ))
            .into()),
        }
    }
}

// =============================================================================
// Mock Entity Extractor
// =============================================================================

pub struct MockEntityExtractor {
    entities: Mutex<Vec<ExtractedEntity>>,
    relationships: Mutex<Vec<ExtractedRelationship>>,
    /// Errors consumed (in order) before extraction starts succeeding.
    failures: Mutex<Vec<PipelineError>>,
    /// Decisions consumed (in order); when the queue is empty the
    /// adjudicator declines.
    merge_decisions: Mutex<Vec<MergeDecision>>,
    extract_calls: Arc<Mutex<Vec<String>>>,
    adjudicate_calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockEntityExtractor {
    pub fn new() -> Self {
        Self {
            entities: Mutex::new(Vec::new()),
            relationships: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            merge_decisions: Mutex::new(Vec::new()),
            extract_calls: Arc::new(Mutex::new(Vec::new())),
            adjudicate_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_entity(self, surface_text: &str, entity_type: crate::resolution::EntityType) -> Self {
        self.entities.lock().unwrap().push(ExtractedEntity {
            surface_text: surface_text.to_string(),
            entity_type,
            start_offset: 0,
            end_offset: surface_text.len() as i32,
            confidence: 0.9,
        });
        self
    }

    pub fn with_relationship(self, source: &str, target: &str, kind: &str) -> Self {
        self.relationships.lock().unwrap().push(ExtractedRelationship {
            source_name: source.to_string(),
            target_name: target.to_string(),
            relationship_type: kind.to_string(),
            confidence: 0.85,
            evidence: None,
        });
        self
    }

    /// Fail the next N extract calls with the given errors, in order.
    pub fn failing_first(self, errors: Vec<PipelineError>) -> Self {
        *self.failures.lock().unwrap() = errors;
        self
    }

    /// Queue a merge-adjudication verdict; calls consume them in order.
    pub fn with_merge_decision(self, should_merge: bool, confidence: f64) -> Self {
        self.merge_decisions.lock().unwrap().push(MergeDecision {
            should_merge,
            confidence,
        });
        self
    }

    /// Texts passed to extract_entities, in call order.
    pub fn extract_calls(&self) -> Vec<String> {
        self.extract_calls.lock().unwrap().clone()
    }

    /// Name pairs passed to adjudicate_merge, in call order.
    pub fn adjudicate_calls(&self) -> Vec<(String, String)> {
        self.adjudicate_calls.lock().unwrap().clone()
    }
}

impl Default for MockEntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseEntityExtractor for MockEntityExtractor {
    async fn extract_entities(&self, text: &str) -> Result<Vec<ExtractedEntity>> {
        self.extract_calls.lock().unwrap().push(text.to_string());

        let mut failures = self.failures.lock().unwrap();
        if !failures.is_empty() {
            return Err(failures.remove(0).into());
        }

        // Only report entities whose surface text occurs in this span,
        // with offsets relative to it.
        let scripted = self.entities.lock().unwrap();
        Ok(scripted
            .iter()
            .filter_map(|e| {
                text.find(&e.surface_text).map(|pos| ExtractedEntity {
                    start_offset: pos as i32,
                    end_offset: (pos + e.surface_text.len()) as i32,
                    ..e.clone()
                })
            })
            .collect())
    }

    async fn extract_relationships(
        &self,
        _text: &str,
        entity_names: &[String],
    ) -> Result<Vec<ExtractedRelationship>> {
        let scripted = self.relationships.lock().unwrap();
        Ok(scripted
            .iter()
            .filter(|r| {
                entity_names.contains(&r.source_name) && entity_names.contains(&r.target_name)
            })
            .cloned()
            .collect())
    }

    async fn adjudicate_merge(
        &self,
        left_name: &str,
        right_name: &str,
        _entity_type: crate::resolution::EntityType,
    ) -> Result<MergeDecision> {
        self.adjudicate_calls
            .lock()
            .unwrap()
            .push((left_name.to_string(), right_name.to_string()));

        let mut decisions = self.merge_decisions.lock().unwrap();
        if decisions.is_empty() {
            Ok(MergeDecision {
                should_merge: false,
                confidence: 1.0,
            })
        } else {
            Ok(decisions.remove(0))
        }
    }
}

// =============================================================================
// In-Memory Object Store
// =============================================================================

#[derive(Default)]
pub struct InMemoryObjectStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: &str, bytes: &[u8]) -> Self {
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        self
    }
}

#[async_trait]
impl BaseObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.blobs.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::Resource(format!("object {key} not found")).into())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }
}
