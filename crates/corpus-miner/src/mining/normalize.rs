//! Text normalization: URL removal, non-word and digit stripping, case folding

use regex::Regex;

use crate::error::{Error, Result};

const URL_PATTERN: &str = r"(?:https?://)?[\w.-]+(?:\.[\w.-]+)+[\w\-._~:/?#\[\]@!$&'()*+,;=]+";

/// Compiled normalization patterns
#[derive(Debug, Clone)]
pub struct Normalizer {
    url: Regex,
    non_word: Regex,
    digit: Regex,
    spaces: Regex,
}

impl Normalizer {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::internal(format!("invalid pattern {}: {}", pattern, e)))
        };
        Ok(Self {
            url: compile(URL_PATTERN)?,
            non_word: compile(r"\W")?,
            digit: compile(r"\d")?,
            spaces: compile(r" +")?,
        })
    }

    /// Normalize a text; `None` when nothing is left
    pub fn normalize(&self, text: &str) -> Option<String> {
        let text = self.url.replace_all(text, " ");
        let text = self.non_word.replace_all(&text, " ");
        let text = self.digit.replace_all(&text, " ");
        let text = self.spaces.replace_all(&text, " ");
        let normalized = text.to_lowercase().trim().to_string();
        (!normalized.is_empty()).then_some(normalized)
    }
}
