//! Core types for the corpus miner

pub mod document;
pub mod topic;

pub use document::{DocumentIdentity, DocumentInput, DocumentRecord, FileType, Language};
pub use topic::{DocumentTopicWeight, DocumentTopics, Topic, TopicModelOutput};
