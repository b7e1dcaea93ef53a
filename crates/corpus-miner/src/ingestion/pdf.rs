//! Paginated document readers (PDF and XPS)
//!
//! The embedded text layer is read page by page. When it yields fewer than
//! `min_chars_per_page * page_count` characters the document is treated as
//! scanned: every page is rasterized and run through OCR instead.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;

use super::external_tools;
use super::reader::ReadError;
use crate::config::ReaderConfig;

/// Text layer of a paginated document
#[derive(Debug, Clone, Default)]
pub struct TextLayer {
    pub text: String,
    pub page_count: u32,
}

impl TextLayer {
    /// Whether the text layer is too thin to be trusted
    pub fn is_sparse(&self, min_chars_per_page: usize) -> bool {
        let chars = self.text.trim().chars().count();
        chars < min_chars_per_page * self.page_count as usize
    }
}

/// Read the PDF text layer page by page with lopdf
///
/// Falls back to pdf-extract for the whole document when lopdf cannot load
/// the file.
pub fn pdf_text_layer(path: &Path) -> Result<TextLayer, ReadError> {
    match lopdf::Document::load(path) {
        Ok(doc) => {
            let pages = doc.get_pages();
            let mut text = String::new();
            for &page_number in pages.keys() {
                match doc.extract_text(&[page_number]) {
                    Ok(page_text) => text.push_str(&page_text),
                    Err(e) => {
                        tracing::debug!("No text layer on page {} of {:?}: {}", page_number, path, e);
                    }
                }
            }
            Ok(TextLayer {
                text,
                page_count: pages.len() as u32,
            })
        }
        Err(e) => {
            tracing::warn!("lopdf failed on {:?}: {}, trying pdf-extract", path, e);
            let owned = path.to_path_buf();
            let extracted = std::panic::catch_unwind(move || pdf_extract::extract_text(&owned))
                .map_err(|_| ReadError::Corrupt {
                    kind: "pdf",
                    message: "pdf-extract panicked".to_string(),
                })?
                .map_err(|e| ReadError::Corrupt {
                    kind: "pdf",
                    message: e.to_string(),
                })?;
            Ok(TextLayer {
                text: extracted,
                page_count: 0,
            })
        }
    }
}

/// Number of pages in a PDF (0 when it cannot be determined)
pub fn pdf_page_count(path: &Path) -> u32 {
    match lopdf::Document::load(path) {
        Ok(doc) => doc.get_pages().len() as u32,
        Err(e) => {
            tracing::warn!("Could not get page count for {:?}: {}", path, e);
            0
        }
    }
}

/// Read the XPS text layer from the `Glyphs/@UnicodeString` of each fixed page
pub fn xps_text_layer(path: &Path) -> Result<TextLayer, ReadError> {
    let mut archive = open_xps(path)?;
    let page_names = xps_page_names(&archive);

    let mut text = String::new();
    for name in &page_names {
        let mut xml = String::new();
        archive
            .by_name(name)
            .map_err(|e| corrupt_xps(e.to_string()))?
            .read_to_string(&mut xml)?;
        text.push_str(&glyph_text(&xml));
    }

    Ok(TextLayer {
        text,
        page_count: page_names.len() as u32,
    })
}

/// Number of fixed pages in an XPS package (0 when it cannot be determined)
pub fn xps_page_count(path: &Path) -> u32 {
    match open_xps(path) {
        Ok(archive) => xps_page_names(&archive).len() as u32,
        Err(e) => {
            tracing::warn!("Could not get page count for {:?}: {}", path, e);
            0
        }
    }
}

fn open_xps(path: &Path) -> Result<zip::ZipArchive<fs::File>, ReadError> {
    let file = fs::File::open(path)?;
    zip::ZipArchive::new(file).map_err(|e| corrupt_xps(e.to_string()))
}

fn corrupt_xps(message: String) -> ReadError {
    ReadError::Corrupt {
        kind: "xps",
        message,
    }
}

/// Fixed page parts, ordered by document and page number
fn xps_page_names(archive: &zip::ZipArchive<fs::File>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.to_lowercase().ends_with(".fpage"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|n| {
        let path = Path::new(n);
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let number = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(u64::MAX);
        (parent, number, n.clone())
    });
    names
}

/// Concatenate the Unicode strings of every `<Glyphs>` run on a page
fn glyph_text(xml: &str) -> String {
    let mut reader = XmlReader::from_str(xml);
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"Glyphs" => {
                for attr in e.attributes().flatten() {
                    if attr.key.local_name().as_ref() != b"UnicodeString" {
                        continue;
                    }
                    if let Ok(value) = attr.unescape_value() {
                        // A leading "{}" escapes strings that start with a brace
                        let value = value.strip_prefix("{}").unwrap_or(value.as_ref());
                        text.push_str(value);
                        text.push('\n');
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!("Malformed XPS page markup: {}", e);
                break;
            }
            _ => {}
        }
    }

    text
}

/// Which rasterizer handles a paginated format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paginated {
    Pdf,
    Xps,
}

/// Read a paginated document, falling back to OCR for scanned pages
pub fn read_paginated(
    config: &ReaderConfig,
    kind: Paginated,
    path: &Path,
) -> Result<String, ReadError> {
    let layer = match kind {
        Paginated::Pdf => pdf_text_layer(path)?,
        Paginated::Xps => xps_text_layer(path)?,
    };

    if !layer.is_sparse(config.min_chars_per_page) {
        return Ok(layer.text);
    }

    tracing::info!(
        "Low text yield ({} chars over {} pages) for {:?}, attempting OCR",
        layer.text.trim().chars().count(),
        layer.page_count,
        path
    );
    ocr_pages(config, kind, path)
}

/// Rasterize each page, OCR it, and concatenate in page order
fn ocr_pages(config: &ReaderConfig, kind: Paginated, path: &Path) -> Result<String, ReadError> {
    let (tool, rasterizer) = match kind {
        Paginated::Pdf => ("rasterizer", config.rasterizer_path.as_deref()),
        Paginated::Xps => ("xps_rasterizer", config.xps_rasterizer_path.as_deref()),
    };
    let rasterizer = rasterizer.ok_or(ReadError::ToolUnavailable { tool })?;
    let tesseract = config
        .tesseract_path
        .as_deref()
        .ok_or(ReadError::ToolUnavailable { tool: "tesseract" })?;

    let scratch = scratch_dir(&config.temporary_path, "ocr");
    let result = (|| -> Result<String, ReadError> {
        let images = match kind {
            Paginated::Pdf => {
                external_tools::rasterize_pdf(rasterizer, path, config.image_resolution, &scratch)?
            }
            Paginated::Xps => {
                external_tools::rasterize_xps(rasterizer, path, config.image_resolution, &scratch)?
            }
        };
        let mut text = String::new();
        for image in &images {
            text.push_str(&external_tools::ocr_image(
                tesseract,
                image,
                &config.tesseract_language,
            )?);
        }
        tracing::info!("OCR extracted {} characters from {} pages", text.len(), images.len());
        Ok(text)
    })();

    if !config.keep_intermediate_files {
        fs::remove_dir_all(&scratch).ok();
    }
    result
}

/// Private scratch directory under the configured temporary path
pub(crate) fn scratch_dir(temporary_path: &Path, purpose: &str) -> PathBuf {
    temporary_path.join(format!("{}-{}", purpose, uuid::Uuid::new_v4()))
}
