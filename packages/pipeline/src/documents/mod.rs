//! Document and chunk models.

mod chunk;
mod document;

pub use chunk::{chunk_text, Chunk, NewChunk};
pub use document::{Document, DocumentStatus};
