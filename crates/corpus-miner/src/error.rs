//! Error types for the corpus miner

use thiserror::Error;

/// Result type alias for corpus miner operations
pub type Result<T> = std::result::Result<T, Error>;

/// Batch-level and infrastructure errors
///
/// Per-document failures never surface here: they are recorded inline on the
/// document's record. Only conditions that make a whole run meaningless are
/// raised to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required external tool could not be resolved
    #[error("External tool '{tool}' not found at '{path}'")]
    ToolUnavailable { tool: String, path: String },

    /// No documents were submitted
    #[error("No documents submitted")]
    EmptyBatch,

    /// Nothing left to model after mining
    #[error("Mined corpus is empty: no error-free documents to model")]
    EmptyCorpus,

    /// Document-frequency bounds pruned away every term
    #[error("Degenerate vocabulary: {0}")]
    DegenerateVocabulary(String),

    /// A processing run is already active
    #[error("A processing run is already in progress")]
    AlreadyRunning,

    /// Worker process could not be started
    #[error("Failed to spawn extraction worker {worker}: {message}")]
    WorkerSpawn { worker: usize, message: String },

    /// Incremental cache error
    #[error("Cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a tool-unavailable error
    pub fn tool_unavailable(tool: impl Into<String>, path: impl Into<String>) -> Self {
        Self::ToolUnavailable {
            tool: tool.into(),
            path: path.into(),
        }
    }

    /// Create a degenerate-vocabulary error
    pub fn degenerate_vocabulary(message: impl Into<String>) -> Self {
        Self::DegenerateVocabulary(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
