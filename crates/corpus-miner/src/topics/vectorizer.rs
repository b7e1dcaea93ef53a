//! Bag-of-n-grams vectorization with document-frequency pruning

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};

/// Sparse row of term counts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseRow {
    pub ids: Vec<usize>,
    pub counts: Vec<f64>,
}

impl SparseRow {
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }
}

/// Document-term count matrix with its vocabulary
#[derive(Debug, Clone)]
pub struct DocumentTermMatrix {
    /// Terms in lexicographic order; column `i` counts `vocabulary[i]`
    pub vocabulary: Vec<String>,
    pub rows: Vec<SparseRow>,
}

impl DocumentTermMatrix {
    pub fn n_documents(&self) -> usize {
        self.rows.len()
    }

    pub fn n_terms(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn total_count(&self) -> f64 {
        self.rows.iter().map(SparseRow::total).sum()
    }
}

/// Counts n-grams of whitespace tokens at least two characters long
#[derive(Debug, Clone)]
pub struct CountVectorizer {
    pub ngram_range: (usize, usize),
    /// Terms in more than `max_df * n_docs` documents are dropped
    pub max_df: f64,
    /// Terms in fewer than `min_df * n_docs` documents are dropped
    pub min_df: f64,
}

impl CountVectorizer {
    pub fn new(ngram_range: (usize, usize), min_df: f64, max_df: f64) -> Self {
        Self {
            ngram_range,
            max_df,
            min_df,
        }
    }

    /// Learn the vocabulary and count every document against it
    pub fn fit_transform<S: AsRef<str>>(&self, documents: &[S]) -> Result<DocumentTermMatrix> {
        let counted: Vec<HashMap<String, usize>> = documents
            .iter()
            .map(|doc| self.count_terms(doc.as_ref()))
            .collect();

        let mut document_frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for counts in &counted {
            for term in counts.keys() {
                *document_frequency.entry(term.as_str()).or_default() += 1;
            }
        }
        if document_frequency.is_empty() {
            return Err(Error::degenerate_vocabulary(
                "empty vocabulary; documents contain no usable tokens",
            ));
        }

        let n_docs = documents.len() as f64;
        let max_count = self.max_df * n_docs;
        let min_count = self.min_df * n_docs;
        if max_count < min_count {
            return Err(Error::degenerate_vocabulary(
                "max_df corresponds to fewer documents than min_df",
            ));
        }

        let vocabulary: Vec<String> = document_frequency
            .iter()
            .filter(|(_, &df)| (df as f64) <= max_count && (df as f64) >= min_count)
            .map(|(term, _)| term.to_string())
            .collect();
        if vocabulary.is_empty() {
            return Err(Error::degenerate_vocabulary(format!(
                "no terms remain after pruning {} candidates; lower min_df or raise max_df",
                document_frequency.len()
            )));
        }

        let index: HashMap<&str, usize> = vocabulary
            .iter()
            .enumerate()
            .map(|(i, term)| (term.as_str(), i))
            .collect();
        let rows = counted
            .iter()
            .map(|counts| {
                let mut entries: Vec<(usize, f64)> = counts
                    .iter()
                    .filter_map(|(term, &count)| index.get(term.as_str()).map(|&i| (i, count as f64)))
                    .collect();
                entries.sort_by_key(|&(i, _)| i);
                let (ids, counts) = entries.into_iter().unzip();
                SparseRow { ids, counts }
            })
            .collect();

        tracing::debug!(
            "Vectorized {} documents: {} of {} terms kept",
            documents.len(),
            vocabulary.len(),
            document_frequency.len()
        );
        Ok(DocumentTermMatrix { vocabulary, rows })
    }

    fn count_terms(&self, text: &str) -> HashMap<String, usize> {
        let tokens: Vec<&str> = text
            .split_whitespace()
            .filter(|t| t.chars().count() >= 2)
            .collect();
        let (low, high) = self.ngram_range;
        let mut counts = HashMap::new();
        for n in low.max(1)..=high {
            for gram in tokens.windows(n) {
                *counts.entry(gram.join(" ")).or_default() += 1;
            }
        }
        counts
    }
}
