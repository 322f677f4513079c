//! Document knowledge pipeline: staged extraction, entity resolution,
//! and relationship building over a durable task queue.
//!
//! Documents move through six ordered stages, each executed as a queue
//! task by stateless workers that coordinate only through Postgres and
//! the cache. Stage handlers live under [`coordinator::stages`]; the
//! cross-cutting ordering machinery (locks, idempotent skip, circuit
//! breakers, chaining) lives in [`coordinator`].

pub mod api;
pub mod batches;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod documents;
pub mod error;
pub mod kernel;
pub mod providers;
pub mod relationships;
pub mod resolution;
pub mod tasks;

pub use config::Config;
pub use error::PipelineError;
