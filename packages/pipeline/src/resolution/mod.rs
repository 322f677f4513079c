pub mod engine;
pub mod models;
pub mod similarity;

pub use engine::{ResolutionEngine, ResolutionOutcome};
pub use models::{CanonicalEntity, EntityMention, EntityType, NewMention, ResolutionMethod};
