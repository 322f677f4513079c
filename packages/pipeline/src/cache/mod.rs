//! Cache/state layer: TTL key-value store, distributed stage locks,
//! status acceleration, and durable-vs-cache reconciliation.

mod lock;
mod reconcile;
mod status;
mod store;

pub use lock::StageLock;
pub use reconcile::{reconcile_document_status, run_reconciliation_loop};
pub use status::{CachedResult, StateCache};
pub use store::{get_json, set_json, CacheStore, InMemoryCacheStore, RedisCacheStore};
