//! Format readers: single-file text extraction dispatched by extension

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::external_tools;
use super::pdf::{self, Paginated};
use crate::config::ReaderConfig;
use crate::types::FileType;

/// Typed read failure, reported inline as `Reader Error: <detail>`
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("file_path:'{0}' is not a file or does not exist")]
    NotFound(PathBuf),

    #[error("unsupported file type '{0}'")]
    Unsupported(String),

    #[error("{tool} is not configured")]
    ToolUnavailable { tool: &'static str },

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: &'static str, message: String },

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: &'static str, secs: f64 },

    #[error("not able to read {kind} file: {message}")]
    Corrupt { kind: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReadError {
    /// Inline error string recorded on the document
    pub fn to_record_error(&self) -> String {
        format!("Reader Error: {}", self)
    }
}

/// Decode text as UTF-8, falling back to Latin-1
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        // Every byte is a valid Latin-1 code point
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Transliterate to a plain-ASCII-safe form
pub fn transliterate(text: &str) -> String {
    deunicode::deunicode(text)
}

/// Reader for every supported file type
#[derive(Debug, Clone)]
pub struct FormatReader {
    config: ReaderConfig,
}

impl FormatReader {
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Page count used to scale the extraction deadline
    ///
    /// Text and office documents report 0, images 1, PDF/XPS their page
    /// count (0 when it cannot be determined).
    pub fn page_count(&self, path: &Path) -> u32 {
        match FileType::from_path(path) {
            FileType::Txt | FileType::Doc | FileType::Docx | FileType::Unknown => 0,
            FileType::Image => 1,
            FileType::Pdf => pdf::pdf_page_count(path),
            FileType::Xps => pdf::xps_page_count(path),
        }
    }

    /// Extract and transliterate the text of one file
    pub fn read(&self, path: &Path) -> Result<String, ReadError> {
        if !path.is_file() {
            return Err(ReadError::NotFound(path.to_path_buf()));
        }

        let text = match FileType::from_path(path) {
            FileType::Txt => Ok(decode_text(&fs::read(path)?)),
            FileType::Doc => self.read_doc(path),
            FileType::Docx => read_docx(path),
            FileType::Image => self.read_image(path),
            FileType::Pdf => pdf::read_paginated(&self.config, Paginated::Pdf, path),
            FileType::Xps => pdf::read_paginated(&self.config, Paginated::Xps, path),
            FileType::Unknown => Err(ReadError::Unsupported(
                path.extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )),
        }?;

        Ok(transliterate(&text))
    }

    fn read_doc(&self, path: &Path) -> Result<String, ReadError> {
        let converter = self
            .config
            .converter_path
            .as_deref()
            .ok_or(ReadError::ToolUnavailable { tool: "converter" })?;
        let scratch = pdf::scratch_dir(&self.config.temporary_path, "convert");
        external_tools::convert_to_text(
            converter,
            path,
            &scratch,
            self.config.converter_timeout(),
            self.config.keep_intermediate_files,
        )
    }

    fn read_image(&self, path: &Path) -> Result<String, ReadError> {
        let tesseract = self
            .config
            .tesseract_path
            .as_deref()
            .ok_or(ReadError::ToolUnavailable { tool: "tesseract" })?;
        external_tools::ocr_image(tesseract, path, &self.config.tesseract_language)
    }
}

/// Paragraph text of a .docx document
fn read_docx(path: &Path) -> Result<String, ReadError> {
    let data = fs::read(path)?;
    let doc = docx_rs::read_docx(&data).map_err(|e| ReadError::Corrupt {
        kind: "docx",
        message: e.to_string(),
    })?;

    let mut content = String::new();
    for child in doc.document.children {
        if let docx_rs::DocumentChild::Paragraph(p) = child {
            for child in p.children {
                if let docx_rs::ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let docx_rs::RunChild::Text(t) = child {
                            content.push_str(&t.text);
                        }
                    }
                }
            }
            content.push('\n');
        }
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(dir: &Path) -> FormatReader {
        FormatReader::new(ReaderConfig {
            temporary_path: dir.join("tmp"),
            ..ReaderConfig::without_tools()
        })
    }

    #[test]
    fn test_utf8_text_is_transliterated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        fs::write(&path, "Café déjà vu").unwrap();

        let text = reader(dir.path()).read(&path).unwrap();
        assert_eq!(text, "Cafe deja vu");
    }

    #[test]
    fn test_latin1_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.txt");
        fs::write(&path, b"r\xe9sum\xe9").unwrap();

        let text = reader(dir.path()).read(&path).unwrap();
        assert_eq!(text, "resume");
    }

    #[test]
    fn test_unsupported_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.xlsx");
        fs::write(&path, b"PK").unwrap();
        let reader = reader(dir.path());

        assert!(matches!(reader.read(&path), Err(ReadError::Unsupported(ext)) if ext == "xlsx"));
        assert!(matches!(
            reader.read(&dir.path().join("gone.txt")),
            Err(ReadError::NotFound(_))
        ));
    }

    #[test]
    fn test_disabled_tools_fail_per_document() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("old.doc");
        let png = dir.path().join("scan.png");
        fs::write(&doc, b"binary").unwrap();
        fs::write(&png, b"binary").unwrap();
        let reader = reader(dir.path());

        let err = reader.read(&doc).unwrap_err();
        assert_eq!(err.to_record_error(), "Reader Error: converter is not configured");
        assert!(matches!(
            reader.read(&png),
            Err(ReadError::ToolUnavailable { tool: "tesseract" })
        ));
    }

    #[test]
    fn test_page_counts_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let reader = reader(dir.path());
        assert_eq!(reader.page_count(Path::new("a.txt")), 0);
        assert_eq!(reader.page_count(Path::new("a.docx")), 0);
        assert_eq!(reader.page_count(Path::new("a.png")), 1);
        assert_eq!(reader.page_count(&dir.path().join("missing.pdf")), 0);
    }

    #[test]
    fn test_corrupt_docx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        fs::write(&path, b"not a zip").unwrap();
        assert!(matches!(
            reader(dir.path()).read(&path),
            Err(ReadError::Corrupt { kind: "docx", .. })
        ));
    }
}
