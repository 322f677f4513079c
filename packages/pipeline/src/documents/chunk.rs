use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// One contiguous slice of a document's extracted text. Immutable after
/// creation; chunks cover the document with no gaps, ordered by index.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub start_offset: i32,
    pub end_offset: i32,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A chunk before insertion.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i32,
    pub start_offset: i32,
    pub end_offset: i32,
    pub text: String,
}

impl Chunk {
    /// Insert all chunks for a document in one transaction so the cover
    /// invariant (no gaps, full coverage) is all-or-nothing.
    pub async fn create_all(
        document_id: Uuid,
        chunks: &[NewChunk],
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let mut tx = pool.begin().await?;
        let mut created = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let row = sqlx::query_as::<_, Self>(
                "INSERT INTO chunks (id, document_id, chunk_index, start_offset, end_offset, text)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING *",
            )
            .bind(Uuid::new_v4())
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(chunk.start_offset)
            .bind(chunk.end_offset)
            .bind(&chunk.text)
            .fetch_one(&mut *tx)
            .await?;

            created.push(row);
        }

        tx.commit().await?;
        Ok(created)
    }

    pub async fn find_by_document(document_id: Uuid, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM chunks WHERE document_id = $1 ORDER BY chunk_index ASC",
        )
        .bind(document_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn count_for_document(document_id: Uuid, pool: &PgPool) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chunks WHERE document_id = $1")
            .bind(document_id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }
}

/// Split text into chunks of at most `max_bytes`, breaking on paragraph
/// boundaries where possible. Offsets are byte offsets into the input,
/// the same coordinate system mention and split-part offsets use, and
/// the produced chunks cover the input with no gaps.
pub fn chunk_text(text: &str, max_bytes: usize) -> Vec<NewChunk> {
    let mut chunks = Vec::new();

    if text.is_empty() {
        return chunks;
    }

    let mut start = 0usize;
    let mut index = 0i32;

    while start < text.len() {
        // Back the window edge onto a character boundary so multi-byte
        // characters are never cut.
        let mut hard_end = (start + max_bytes).min(text.len());
        while !text.is_char_boundary(hard_end) {
            hard_end -= 1;
        }
        if hard_end == start {
            hard_end = (start + 1..=text.len())
                .find(|&i| text.is_char_boundary(i))
                .unwrap_or(text.len());
        }

        // Prefer to break at the last paragraph or sentence boundary
        // inside the window, but never produce an empty chunk.
        let end = if hard_end < text.len() {
            let window = &text[start..hard_end];
            let boundary = window
                .rfind("\n\n")
                .map(|p| p + 2)
                .or_else(|| window.rfind(". ").map(|p| p + 2));
            match boundary {
                Some(b) if b > 0 => start + b,
                _ => hard_end,
            }
        } else {
            hard_end
        };

        chunks.push(NewChunk {
            chunk_index: index,
            start_offset: start as i32,
            end_offset: end as i32,
            text: text[start..end].to_string(),
        });

        start = end;
        index += 1;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cover_input_with_no_gaps() {
        let text = "First paragraph.\n\nSecond paragraph with more text.\n\nThird.";
        let chunks = chunk_text(text, 30);

        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].start_offset, 0);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
        assert_eq!(chunks.last().unwrap().end_offset as usize, text.len());
    }

    #[test]
    fn chunk_indexes_are_sequential() {
        let chunks = chunk_text(&"word ".repeat(100), 50);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i32);
        }
    }

    #[test]
    fn reassembled_chunks_equal_original() {
        let text = "Sentence one. Sentence two. Sentence three. Sentence four.";
        let chunks = chunk_text(text, 25);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn empty_text_produces_no_chunks() {
        assert!(chunk_text("", 100).is_empty());
    }

    #[test]
    fn respects_max_bytes() {
        let chunks = chunk_text(&"a".repeat(1000), 100);
        assert!(chunks.iter().all(|c| c.text.len() <= 100));
    }

    #[test]
    fn non_ascii_offsets_are_byte_offsets_on_character_boundaries() {
        let text = "Bücher über Zürich. ".repeat(20);
        let chunks = chunk_text(&text, 50);

        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
        assert_eq!(chunks.last().unwrap().end_offset as usize, text.len());

        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
        assert!(chunks.iter().all(|c| c.text.len() <= 50));

        // Each chunk's offsets slice the original without panicking.
        for chunk in &chunks {
            assert_eq!(
                &text[chunk.start_offset as usize..chunk.end_offset as usize],
                chunk.text
            );
        }
    }
}
