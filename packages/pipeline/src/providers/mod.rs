//! Production implementations of the kernel's provider traits.

mod extractor;
mod object_store;
mod ocr;

pub use extractor::LlmEntityExtractor;
pub use object_store::FsObjectStore;
pub use ocr::HttpOcrProvider;
