//! corpus-miner: fault-isolated document extraction, text mining and topic modeling
//!
//! Files are read by a pool of worker processes so that a single pathological
//! document cannot stall a batch. Extracted text runs through a four-stage
//! mining pipeline, mined documents are kept in an incremental SQLite cache,
//! and an LDA topic model is refit over the accumulated corpus on every run.

pub mod config;
pub mod error;
pub mod ingestion;
pub mod mining;
pub mod processing;
pub mod storage;
pub mod topics;
pub mod types;

pub use config::MinerConfig;
pub use error::{Error, Result};
pub use processing::{Orchestrator, RunReport, RunState};
pub use storage::IncrementalCache;
pub use types::{
    DocumentIdentity, DocumentInput, DocumentRecord, DocumentTopics, FileType, Language, Topic,
    TopicModelOutput,
};
