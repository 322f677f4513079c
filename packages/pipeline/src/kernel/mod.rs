pub mod deps;
pub mod test_dependencies;
pub mod traits;

pub use deps::{PipelineDeps, PipelineTunables};
pub use traits::{
    BaseEntityExtractor, BaseObjectStore, BaseOcrProvider, ExtractedEntity,
    ExtractedRelationship, MergeDecision, OcrJobStatus, OcrResult,
};
