//! Mining pipeline: language detection, normalization, lemmatization, stopword removal
//!
//! Each record runs through the stages once, stopping at the first stage that
//! fails. Records that arrive with an error are left untouched, and the batch
//! keeps its order and length.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::language::detect_language;
use super::lemmatize::{Lemmatizer, SnowballLemmatizer};
use super::normalize::Normalizer;
use super::stopwords::Stopwords;
use crate::config::MiningConfig;
use crate::error::Result;
use crate::types::DocumentRecord;

/// Mining stage that can reject a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DetectLanguage,
    Normalize,
    Lemmatize,
    RemoveStopwords,
}

/// Stage failure; its display form is the inline error marker
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Miner:{stage}")]
pub struct StageError {
    pub stage: Stage,
}

impl Stage {
    fn marker(&self) -> &'static str {
        match self {
            Stage::DetectLanguage => "Cannot detect language",
            Stage::Normalize => "Cannot strip",
            Stage::Lemmatize => "Cannot lemmatize",
            Stage::RemoveStopwords => "Cannot delete stop word",
        }
    }

    fn fail(self) -> StageError {
        StageError { stage: self }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Counts reported after a mining pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningSummary {
    pub mined: usize,
    pub rejected: usize,
    pub skipped: usize,
}

/// The four-stage text mining pipeline
pub struct MiningPipeline {
    config: MiningConfig,
    normalizer: Normalizer,
    lemmatizer: Box<dyn Lemmatizer>,
    stopwords: Stopwords,
}

impl MiningPipeline {
    pub fn new(config: MiningConfig) -> Result<Self> {
        Self::with_lemmatizer(config, Box::new(SnowballLemmatizer::new()))
    }

    pub fn with_lemmatizer(config: MiningConfig, lemmatizer: Box<dyn Lemmatizer>) -> Result<Self> {
        let stopwords = Stopwords::new(lemmatizer.as_ref());
        Ok(Self {
            config,
            normalizer: Normalizer::new()?,
            lemmatizer,
            stopwords,
        })
    }

    /// Mine every error-free record in place
    pub fn mine(&self, records: &mut [DocumentRecord]) -> MiningSummary {
        let outcomes: Vec<Option<bool>> = records
            .par_iter_mut()
            .map(|record| {
                if !record.is_ok() {
                    return None;
                }
                Some(self.mine_one(record).is_ok())
            })
            .collect();

        let summary = outcomes.iter().fold(MiningSummary::default(), |mut acc, o| {
            match o {
                Some(true) => acc.mined += 1,
                Some(false) => acc.rejected += 1,
                None => acc.skipped += 1,
            }
            acc
        });
        tracing::info!(
            "Mining complete: {} mined, {} rejected, {} carried with earlier errors",
            summary.mined,
            summary.rejected,
            summary.skipped
        );
        summary
    }

    /// Run all stages on one record, tagging it with the first failure
    pub fn mine_one(&self, record: &mut DocumentRecord) -> std::result::Result<(), StageError> {
        let result = self.run_stages(record);
        if let Err(e) = &result {
            record.fail(e.to_string());
        }
        result
    }

    fn run_stages(&self, record: &mut DocumentRecord) -> std::result::Result<(), StageError> {
        let text = record.cleaned_text.as_deref().unwrap_or_default();

        let language = detect_language(text).ok_or(Stage::DetectLanguage.fail())?;
        record.detected_language = Some(language);

        let normalized = self
            .normalizer
            .normalize(text)
            .ok_or(Stage::Normalize.fail())?;

        let lemmatized = self.lemmatizer.lemmatize_text(language, &normalized);
        if lemmatized.is_empty() {
            record.normalized_text = Some(normalized);
            return Err(Stage::Lemmatize.fail());
        }

        let filtered = self
            .stopwords
            .remove(language, &lemmatized, self.config.min_token_len);

        record.normalized_text = Some(normalized);
        record.lemmatized_text = Some(lemmatized);
        if filtered.is_empty() {
            return Err(Stage::RemoveStopwords.fail());
        }
        record.filtered_text = Some(filtered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentInput, Language};
    use chrono::Utc;

    fn record(name: &str, text: Option<&str>, error: Option<&str>) -> DocumentRecord {
        let input = DocumentInput::new(format!("/docs/{}.txt", name), Utc::now(), 10);
        let mut record = DocumentRecord::new(&input);
        record.cleaned_text = text.map(str::to_string);
        record.error = error.map(str::to_string);
        record
    }

    const ENGLISH: &str = "The committee reviewed the quarterly budget and approved new funding \
        for the regional hospitals, schools and libraries across the northern districts.";

    #[test]
    fn test_stage_markers() {
        assert_eq!(Stage::DetectLanguage.fail().to_string(), "Miner:Cannot detect language");
        assert_eq!(Stage::Normalize.fail().to_string(), "Miner:Cannot strip");
        assert_eq!(Stage::Lemmatize.fail().to_string(), "Miner:Cannot lemmatize");
        assert_eq!(Stage::RemoveStopwords.fail().to_string(), "Miner:Cannot delete stop word");
    }

    #[test]
    fn test_mine_preserves_order_and_prior_errors() {
        let pipeline = MiningPipeline::new(MiningConfig::default()).unwrap();
        let mut records = vec![
            record("a", Some(ENGLISH), None),
            record("b", None, Some("Reader Error: broken")),
            record("c", Some("12345 67890 !!! ???"), None),
            record("d", Some(ENGLISH), None),
        ];

        let summary = pipeline.mine(&mut records);
        assert_eq!(summary, MiningSummary { mined: 2, rejected: 1, skipped: 1 });

        let names: Vec<_> = records.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);

        assert_eq!(records[0].detected_language, Some(Language::English));
        let filtered = records[0].filtered_text.as_deref().unwrap();
        assert!(filtered.contains("budget"));
        assert!(!filtered.split(' ').any(|t| t == "the" || t == "and"));

        assert_eq!(records[1].error.as_deref(), Some("Reader Error: broken"));
        assert!(records[1].detected_language.is_none());

        assert_eq!(records[2].error.as_deref(), Some("Miner:Cannot detect language"));
        assert!(records[2].filtered_text.is_none());
    }

    #[test]
    fn test_mining_is_idempotent() {
        let pipeline = MiningPipeline::new(MiningConfig::default()).unwrap();
        let mut records = vec![record("a", Some(ENGLISH), None)];
        pipeline.mine(&mut records);
        let first = records.clone();
        pipeline.mine(&mut records);
        assert_eq!(records, first);
    }

    #[test]
    fn test_empty_filter_result_fails_last_stage() {
        let config = MiningConfig { min_token_len: 40 };
        let pipeline = MiningPipeline::new(config).unwrap();
        let mut record = record("s", Some(ENGLISH), None);

        let err = pipeline.mine_one(&mut record).unwrap_err();
        assert_eq!(err.stage, Stage::RemoveStopwords);
        assert_eq!(record.error.as_deref(), Some("Miner:Cannot delete stop word"));
        assert!(record.lemmatized_text.is_some());
        assert!(record.filtered_text.is_none());
    }
}
