//! Storage module for persistent data storage
//!
//! Provides the SQLite-backed incremental cache of mined documents.

mod cache;

pub use cache::IncrementalCache;
