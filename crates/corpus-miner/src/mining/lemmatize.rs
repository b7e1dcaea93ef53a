//! Token lemmatization

use rust_stemmers::{Algorithm, Stemmer};

use crate::types::Language;

/// Reduces a token to its base form
pub trait Lemmatizer: Send + Sync {
    fn lemmatize(&self, language: Language, token: &str) -> String;

    /// Lemmatize a whitespace-tokenized text
    fn lemmatize_text(&self, language: Language, text: &str) -> String {
        text.split_whitespace()
            .map(|token| self.lemmatize(language, token))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Snowball stemmer per supported language
pub struct SnowballLemmatizer {
    english: Stemmer,
    french: Stemmer,
}

impl SnowballLemmatizer {
    pub fn new() -> Self {
        Self {
            english: Stemmer::create(Algorithm::English),
            french: Stemmer::create(Algorithm::French),
        }
    }
}

impl Default for SnowballLemmatizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Lemmatizer for SnowballLemmatizer {
    fn lemmatize(&self, language: Language, token: &str) -> String {
        let stemmer = match language {
            Language::English => &self.english,
            Language::French => &self.french,
        };
        stemmer.stem(token).into_owned()
    }
}
