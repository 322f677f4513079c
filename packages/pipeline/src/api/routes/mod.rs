mod batches;
mod documents;
mod health;

pub use batches::{batch_status_handler, submit_batch_handler};
pub use documents::{document_status_handler, resubmit_document_handler};
pub use health::health_handler;
