//! Oversized-input splitting with durable join state.
//!
//! Providers cap the input size they accept. Inputs over the ceiling
//! are split at unit (whitespace-token) boundaries into ordered parts;
//! each part's result is persisted as it completes, so a worker that
//! dies mid-way resumes from the finished parts instead of redoing
//! them.

use anyhow::{ensure, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::stage::Stage;

/// Lifecycle of one split part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "part_status", rename_all = "snake_case")]
pub enum PartStatus {
    Pending,
    Completed,
}

/// One durable slice of an oversized provider input.
#[derive(Debug, Clone, FromRow)]
pub struct SplitPart {
    pub id: Uuid,
    pub document_id: Uuid,
    pub stage: Stage,
    pub part_index: i32,
    pub part_count: i32,
    pub status: PartStatus,
    pub chunk_id: Option<Uuid>,
    pub base_offset: i32,
    pub input: String,
    pub result: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

/// A planned slice before persistence.
#[derive(Debug, Clone)]
pub struct PlannedPart {
    pub chunk_id: Option<Uuid>,
    /// Byte offset of this slice within its source text.
    pub base_offset: i32,
    pub input: String,
}

/// Split text into slices of at most `ceiling` whitespace-delimited
/// units, never cutting inside a unit. Slices carry the byte offset
/// of their first unit so downstream offsets can be rebased.
/// Joining the slices in order (with the original gaps) reproduces the
/// input's units exactly.
pub fn split_units(text: &str, ceiling: usize) -> Vec<(usize, String)> {
    // Config validation rejects a zero ceiling; clamp so a bad caller
    // degrades to one-unit parts instead of panicking.
    let ceiling = ceiling.max(1);

    // (start offset, unit) pairs in order.
    let mut units: Vec<(usize, &str)> = Vec::new();
    let mut offset = 0;
    for unit in text.split_whitespace() {
        // split_whitespace loses offsets; recover with find from the
        // previous position. Units are non-overlapping so this is O(n).
        let found = text[offset..].find(unit).map(|p| p + offset);
        if let Some(start) = found {
            units.push((start, unit));
            offset = start + unit.len();
        }
    }

    if units.is_empty() {
        return Vec::new();
    }

    units
        .chunks(ceiling)
        .map(|group| {
            let start = group[0].0;
            let last = group[group.len() - 1];
            let end = last.0 + last.1.len();
            (start, text[start..end].to_string())
        })
        .collect()
}

impl SplitPart {
    /// Persist a part plan for (document, stage), or return the existing
    /// plan if one was already persisted — the resumable join state.
    pub async fn plan(
        document_id: Uuid,
        stage: Stage,
        parts: Vec<PlannedPart>,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let existing = Self::find_all(document_id, stage, pool).await?;
        if !existing.is_empty() {
            return Ok(existing);
        }

        ensure!(!parts.is_empty(), "cannot plan an empty part list");

        let part_count = parts.len() as i32;
        let mut tx = pool.begin().await?;
        let mut created = Vec::with_capacity(parts.len());

        for (index, part) in parts.into_iter().enumerate() {
            let row = sqlx::query_as::<_, Self>(
                "INSERT INTO split_parts
                     (id, document_id, stage, part_index, part_count,
                      chunk_id, base_offset, input)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 RETURNING *",
            )
            .bind(Uuid::new_v4())
            .bind(document_id)
            .bind(stage)
            .bind(index as i32)
            .bind(part_count)
            .bind(part.chunk_id)
            .bind(part.base_offset)
            .bind(&part.input)
            .fetch_one(&mut *tx)
            .await?;

            created.push(row);
        }

        tx.commit().await?;
        Ok(created)
    }

    pub async fn find_all(document_id: Uuid, stage: Stage, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM split_parts
             WHERE document_id = $1 AND stage = $2
             ORDER BY part_index ASC",
        )
        .bind(document_id)
        .bind(stage)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Record a part's result and mark it completed.
    pub async fn complete(&self, result: &Value, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE split_parts
             SET status = 'completed', result = $2, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(self.id)
        .bind(result)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Clean out join state once the stage has durably committed its
    /// joined output.
    pub async fn clear(document_id: Uuid, stage: Stage, pool: &PgPool) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM split_parts WHERE document_id = $1 AND stage = $2")
            .bind(document_id)
            .bind(stage)
            .execute(pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_ceiling_yields_single_part() {
        let parts = split_units("one two three", 500);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0], (0, "one two three".to_string()));
    }

    #[test]
    fn splits_at_unit_boundaries_never_inside_units() {
        let text = "alpha beta gamma delta epsilon";
        let parts = split_units(text, 2);
        assert_eq!(parts.len(), 3);
        for (_, slice) in &parts {
            for unit in slice.split_whitespace() {
                assert!(text.split_whitespace().any(|u| u == unit));
            }
        }
    }

    #[test]
    fn two_point_four_times_ceiling_yields_three_ordered_parts() {
        let units: Vec<String> = (0..12).map(|i| format!("w{i}")).collect();
        let text = units.join(" ");

        // Ceiling 5, 12 units: 2.4x the ceiling.
        let parts = split_units(&text, 5);
        assert_eq!(parts.len(), 3);

        // Joining in order reproduces every unit in sequence.
        let rejoined: Vec<&str> = parts
            .iter()
            .flat_map(|(_, s)| s.split_whitespace())
            .collect();
        let original: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(rejoined, original);
    }

    #[test]
    fn offsets_index_into_the_original_text() {
        let text = "aa bb  cc dd";
        for (offset, slice) in split_units(text, 2) {
            assert!(text[offset..].starts_with(slice.split_whitespace().next().unwrap()));
        }
    }

    #[test]
    fn zero_ceiling_is_clamped_to_one_unit_parts() {
        let parts = split_units("alpha beta", 0);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].1, "alpha");
        assert_eq!(parts[1].1, "beta");
    }

    #[test]
    fn empty_and_whitespace_only_inputs_yield_no_parts() {
        assert!(split_units("", 5).is_empty());
        assert!(split_units("   \n\t ", 5).is_empty());
    }
}
