//! The fixed six-stage pipeline order.

use serde::{Deserialize, Serialize};

/// One of the six fixed pipeline phases, in execution order.
///
/// The order is total: a document moves strictly forward through these,
/// never skipping and never regressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "pipeline_stage", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    TextExtraction,
    Chunking,
    EntityExtraction,
    EntityResolution,
    RelationshipBuilding,
    Finalization,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::TextExtraction,
        Stage::Chunking,
        Stage::EntityExtraction,
        Stage::EntityResolution,
        Stage::RelationshipBuilding,
        Stage::Finalization,
    ];

    /// Position in the fixed order, starting at 0.
    pub fn ordinal(&self) -> usize {
        match self {
            Stage::TextExtraction => 0,
            Stage::Chunking => 1,
            Stage::EntityExtraction => 2,
            Stage::EntityResolution => 3,
            Stage::RelationshipBuilding => 4,
            Stage::Finalization => 5,
        }
    }

    /// The stage chained after this one, or `None` past finalization.
    pub fn next(&self) -> Option<Stage> {
        Stage::ALL.get(self.ordinal() + 1).copied()
    }

    /// Queue name for this stage (one queue per stage).
    pub fn queue_name(&self) -> &'static str {
        match self {
            Stage::TextExtraction => "text_extraction",
            Stage::Chunking => "chunking",
            Stage::EntityExtraction => "entity_extraction",
            Stage::EntityResolution => "entity_resolution",
            Stage::RelationshipBuilding => "relationship_building",
            Stage::Finalization => "finalization",
        }
    }

    /// OCR and entity extraction hold large provider payloads in memory;
    /// they run with worker concurrency 1.
    pub fn is_memory_heavy(&self) -> bool {
        matches!(self, Stage::TextExtraction | Stage::EntityExtraction)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.queue_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_total_and_monotonic() {
        for pair in Stage::ALL.windows(2) {
            assert!(pair[0].ordinal() < pair[1].ordinal());
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
    }

    #[test]
    fn finalization_has_no_next_stage() {
        assert_eq!(Stage::Finalization.next(), None);
    }

    #[test]
    fn first_stage_is_text_extraction() {
        assert_eq!(Stage::ALL[0], Stage::TextExtraction);
    }

    #[test]
    fn queue_names_are_distinct() {
        let mut names: Vec<_> = Stage::ALL.iter().map(|s| s.queue_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 6);
    }
}
