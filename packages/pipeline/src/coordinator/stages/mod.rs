//! The six stage handlers. Each does only its domain work; ordering,
//! locking, and chaining live in the coordinator wrapper.

mod chunking;
mod entity_extraction;
mod entity_resolution;
mod finalization;
mod relationship_building;
mod text_extraction;

use std::sync::Arc;

use anyhow::Result;

use super::Stage;
use crate::documents::Document;
use crate::kernel::PipelineDeps;

pub async fn execute(stage: Stage, document: &Document, deps: &Arc<PipelineDeps>) -> Result<()> {
    match stage {
        Stage::TextExtraction => text_extraction::run(document, deps).await,
        Stage::Chunking => chunking::run(document, deps).await,
        Stage::EntityExtraction => entity_extraction::run(document, deps).await,
        Stage::EntityResolution => entity_resolution::run(document, deps).await,
        Stage::RelationshipBuilding => relationship_building::run(document, deps).await,
        Stage::Finalization => finalization::run(document, deps).await,
    }
}
