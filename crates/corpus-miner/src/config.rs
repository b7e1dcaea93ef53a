//! Configuration for the corpus miner

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Extraction supervisor configuration
    pub extraction: ExtractionConfig,
    /// Format reader configuration (shipped to every worker process)
    pub reader: ReaderConfig,
    /// Mining pipeline configuration
    pub mining: MiningConfig,
    /// Topic model configuration
    pub topics: TopicModelConfig,
    /// Incremental cache configuration
    pub cache: CacheConfig,
}

impl MinerConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Validate every section, failing fast on missing infrastructure
    pub fn validate(&self) -> Result<()> {
        self.extraction.validate()?;
        self.reader.validate()?;
        self.mining.validate()?;
        self.topics.validate()?;
        Ok(())
    }
}

/// Extraction supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Number of worker processes (default: CPU count)
    pub workers: Option<usize>,
    /// Base per-task timeout in seconds, scaled by page count
    pub base_timeout_secs: f64,
    /// Bounded wait of the supervisor loop, in milliseconds
    pub poll_interval_ms: u64,
    /// Time given to workers to exit after the stop sentinel
    pub shutdown_grace_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            workers: None, // Auto-detect from CPU count
            base_timeout_secs: 60.0,
            poll_interval_ms: 200,
            shutdown_grace_secs: 5,
        }
    }
}

impl ExtractionConfig {
    /// Effective pool size
    pub fn pool_size(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get)
    }

    pub fn base_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.base_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.pool_size() == 0 {
            return Err(Error::config("extraction.workers must be at least 1"));
        }
        if !self.base_timeout_secs.is_finite() || self.base_timeout_secs <= 0.0 {
            return Err(Error::config("extraction.base_timeout_secs must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::config("extraction.poll_interval_ms must be positive"));
        }
        Ok(())
    }
}

/// Format reader configuration
///
/// A tool set to `None` is disabled: files that need it fail individually.
/// A tool that is configured but cannot be resolved fails validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Scratch directory for converter output and rasterized pages
    pub temporary_path: PathBuf,
    /// Office document converter (LibreOffice `soffice`)
    pub converter_path: Option<PathBuf>,
    /// Converter subprocess timeout in seconds
    pub converter_timeout_secs: u64,
    /// OCR engine (`tesseract`)
    pub tesseract_path: Option<PathBuf>,
    /// OCR language models passed to `-l`
    pub tesseract_language: String,
    /// PDF page rasterizer (`pdftoppm`)
    pub rasterizer_path: Option<PathBuf>,
    /// XPS page rasterizer (`mutool`)
    pub xps_rasterizer_path: Option<PathBuf>,
    /// Rasterization resolution in dpi for the OCR fallback
    pub image_resolution: u32,
    /// Minimum text-layer characters per page before falling back to OCR
    pub min_chars_per_page: usize,
    /// Keep intermediate files (debugging)
    pub keep_intermediate_files: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            temporary_path: std::env::temp_dir().join("corpus-miner"),
            converter_path: Some(PathBuf::from("soffice")),
            converter_timeout_secs: 60,
            tesseract_path: Some(PathBuf::from("tesseract")),
            tesseract_language: "eng+fra".to_string(),
            rasterizer_path: Some(PathBuf::from("pdftoppm")),
            xps_rasterizer_path: None,
            image_resolution: 150,
            min_chars_per_page: 5,
            keep_intermediate_files: false,
        }
    }
}

impl ReaderConfig {
    /// Configuration with every external tool disabled
    pub fn without_tools() -> Self {
        Self {
            converter_path: None,
            tesseract_path: None,
            rasterizer_path: None,
            xps_rasterizer_path: None,
            ..Self::default()
        }
    }

    pub fn converter_timeout(&self) -> Duration {
        Duration::from_secs(self.converter_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.image_resolution == 0 {
            return Err(Error::config("reader.image_resolution must be positive"));
        }
        let tools = [
            ("converter", &self.converter_path),
            ("tesseract", &self.tesseract_path),
            ("rasterizer", &self.rasterizer_path),
            ("xps_rasterizer", &self.xps_rasterizer_path),
        ];
        for (tool, path) in tools {
            if let Some(path) = path {
                if resolve_binary(path).is_none() {
                    return Err(Error::tool_unavailable(tool, path.display().to_string()));
                }
            }
        }
        Ok(())
    }
}

/// Resolve a tool path: explicit paths must exist, bare names are looked up on `PATH`
pub fn resolve_binary(path: &Path) -> Option<PathBuf> {
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(path))
        .find(|candidate| candidate.is_file())
}

/// Mining pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Tokens shorter than this are dropped during stopword removal
    pub min_token_len: usize,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self { min_token_len: 2 }
    }
}

impl MiningConfig {
    fn validate(&self) -> Result<()> {
        if self.min_token_len == 0 {
            return Err(Error::config("mining.min_token_len must be at least 1"));
        }
        Ok(())
    }
}

/// Topic model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicModelConfig {
    /// Number of latent topics
    pub n_topics: usize,
    /// Terms reported per topic
    pub top_words: usize,
    /// Inclusive n-gram range
    pub ngram_range: (usize, usize),
    /// Drop terms present in more than this fraction of documents
    pub max_df: f64,
    /// Drop terms present in fewer than this fraction of documents
    pub min_df: f64,
    /// Dirichlet prior on document-topic distributions
    pub doc_topic_prior: f64,
    /// Dirichlet prior on topic-word distributions
    pub topic_word_prior: f64,
    /// Hard cap on EM iterations
    pub max_iter: usize,
    /// Evaluate perplexity every N iterations (0 disables)
    pub evaluate_every: usize,
    /// Stop when perplexity improves by less than this
    pub perplexity_tolerance: f64,
    /// Cap on per-document variational updates
    pub max_doc_update_iter: usize,
    /// Per-document convergence threshold
    pub mean_change_tolerance: f64,
    /// Seed for the topic-word initialization
    pub random_seed: u64,
}

impl Default for TopicModelConfig {
    fn default() -> Self {
        Self {
            n_topics: 5,
            top_words: 10,
            ngram_range: (1, 2),
            max_df: 0.8,
            min_df: 0.05,
            doc_topic_prior: 0.085,
            topic_word_prior: 0.225,
            max_iter: 500,
            evaluate_every: 50,
            perplexity_tolerance: 0.1,
            max_doc_update_iter: 100,
            mean_change_tolerance: 1e-3,
            random_seed: 0,
        }
    }
}

impl TopicModelConfig {
    fn validate(&self) -> Result<()> {
        if self.n_topics == 0 {
            return Err(Error::config("topics.n_topics must be at least 1"));
        }
        let (low, high) = self.ngram_range;
        if low == 0 || low > high {
            return Err(Error::config(format!(
                "topics.ngram_range ({}, {}) is invalid",
                low, high
            )));
        }
        if !(0.0..=1.0).contains(&self.min_df) || !(0.0..=1.0).contains(&self.max_df) {
            return Err(Error::config("topics.min_df and topics.max_df must be within [0, 1]"));
        }
        if self.min_df > self.max_df {
            return Err(Error::config("topics.min_df must not exceed topics.max_df"));
        }
        if self.doc_topic_prior <= 0.0 || self.topic_word_prior <= 0.0 {
            return Err(Error::config("topic priors must be positive"));
        }
        if self.max_iter == 0 {
            return Err(Error::config("topics.max_iter must be at least 1"));
        }
        Ok(())
    }
}

/// Incremental cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite database holding previously mined documents
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./tmp/corpus-cache.db"),
        }
    }
}
