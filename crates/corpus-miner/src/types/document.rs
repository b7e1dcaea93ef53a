//! Document types flowing through extraction, mining and modeling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Supported file types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Plain text file
    Txt,
    /// Old Microsoft Word document (.doc) - requires the office converter
    Doc,
    /// Microsoft Word document (.docx)
    Docx,
    /// PDF document
    Pdf,
    /// XPS document
    Xps,
    /// Image (for OCR) - requires tesseract
    Image,
    /// Unknown file type
    Unknown,
}

impl FileType {
    /// Detect file type from extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "txt" | "text" => Self::Txt,
            "doc" => Self::Doc,
            "docx" => Self::Docx,
            "pdf" => Self::Pdf,
            "xps" | "oxps" => Self::Xps,
            "png" | "jpg" | "jpeg" | "tif" | "tiff" | "bmp" => Self::Image,
            _ => Self::Unknown,
        }
    }

    /// Detect file type from a path
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }

    /// Check if this is a supported file type
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Stable document identity: the normalized absolute path of the file
///
/// Files that exist are canonicalized (symlinks resolved); otherwise the path
/// is made absolute against the current directory and `.`/`..` are folded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentIdentity(String);

impl DocumentIdentity {
    /// Build the canonical identity of a path
    pub fn from_path(path: &Path) -> Self {
        let normalized = std::fs::canonicalize(path).unwrap_or_else(|_| lexical_absolute(path));
        Self(normalized.to_string_lossy().into_owned())
    }

    /// Wrap an identity that is already canonical (e.g. read back from the cache)
    pub fn from_canonical(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn lexical_absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// One row supplied by the document-storage collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    /// Location of the file on disk
    pub file_path: PathBuf,
    /// Creation (or upload) time
    pub creation_time: DateTime<Utc>,
    /// File size in bytes
    pub file_size: u64,
}

impl DocumentInput {
    pub fn new(file_path: impl Into<PathBuf>, creation_time: DateTime<Utc>, file_size: u64) -> Self {
        Self {
            file_path: file_path.into(),
            creation_time,
            file_size,
        }
    }

    /// Build an input row from file system metadata
    pub fn from_file(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let file_path = path.into();
        let metadata = std::fs::metadata(&file_path)?;
        let creation_time = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(Self {
            file_path,
            creation_time,
            file_size: metadata.len(),
        })
    }

    pub fn identity(&self) -> DocumentIdentity {
        DocumentIdentity::from_path(&self.file_path)
    }
}

/// Per-document state carried through every stage
///
/// Once `error` is set, every later-stage field stays `None` and the record is
/// skipped by subsequent stages, but it keeps its place in the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub identity: DocumentIdentity,
    pub file_path: PathBuf,
    /// File stem, used for display
    pub file_name: String,
    pub file_type: FileType,
    pub creation_time: DateTime<Utc>,
    pub file_size: u64,
    pub page_count: u32,
    /// Wall-clock extraction time
    pub extraction_duration: Duration,
    /// First failure, tagged with the stage that produced it
    pub error: Option<String>,
    /// SHA-256 of the extracted text
    pub content_hash: Option<String>,
    pub raw_text: Option<String>,
    pub cleaned_text: Option<String>,
    pub detected_language: Option<Language>,
    pub normalized_text: Option<String>,
    pub lemmatized_text: Option<String>,
    pub filtered_text: Option<String>,
}

impl DocumentRecord {
    /// Create a fresh record for a submitted input
    pub fn new(input: &DocumentInput) -> Self {
        let file_name = input
            .file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            identity: input.identity(),
            file_path: input.file_path.clone(),
            file_name,
            file_type: FileType::from_path(&input.file_path),
            creation_time: input.creation_time,
            file_size: input.file_size,
            page_count: 0,
            extraction_duration: Duration::ZERO,
            error: None,
            content_hash: None,
            raw_text: None,
            cleaned_text: None,
            detected_language: None,
            normalized_text: None,
            lemmatized_text: None,
            filtered_text: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Tag the record as failed unless an earlier stage already did
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }

    /// Length of the cleaned text, in characters
    pub fn content_size(&self) -> usize {
        self.cleaned_text.as_ref().map_or(0, |t| t.chars().count())
    }

    /// Length of the raw extracted text, in characters
    pub fn raw_content_size(&self) -> usize {
        self.raw_text.as_ref().map_or(0, |t| t.chars().count())
    }

    /// Whether the cached copy of this record still matches an input row
    pub fn matches_fingerprint(&self, input: &DocumentInput) -> bool {
        self.file_size == input.file_size
            && self.creation_time.timestamp_millis() == input.creation_time.timestamp_millis()
    }
}

/// Languages accepted by the mining pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "EN")]
    English,
    #[serde(rename = "FR")]
    French,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Self::English => "EN",
            Self::French => "FR",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "EN" => Some(Self::English),
            "FR" => Some(Self::French),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_from_extension() {
        assert_eq!(FileType::from_extension("PDF"), FileType::Pdf);
        assert_eq!(FileType::from_extension("docx"), FileType::Docx);
        assert_eq!(FileType::from_extension("jpeg"), FileType::Image);
        assert_eq!(FileType::from_extension("xlsx"), FileType::Unknown);
        assert!(!FileType::from_path(Path::new("notes")).is_supported());
    }

    #[test]
    fn test_identity_folds_relative_components() {
        let a = DocumentIdentity::from_path(Path::new("/no/such/dir/../dir/report.pdf"));
        let b = DocumentIdentity::from_path(Path::new("/no/such/dir/./report.pdf"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "/no/such/dir/report.pdf");
    }

    #[test]
    fn test_fail_keeps_first_error() {
        let input = DocumentInput::new("/tmp/a.txt", Utc::now(), 10);
        let mut record = DocumentRecord::new(&input);
        record.fail("Reader Error: first");
        record.fail("Miner:Cannot strip");
        assert_eq!(record.error.as_deref(), Some("Reader Error: first"));
        assert_eq!(record.file_name, "a");
    }
}
