//! Topic modeling over the mined corpus
//!
//! The trainer vectorizes the filtered text of every error-free document into
//! n-gram counts, fits a fresh LDA model and reports the top terms of each
//! topic along with each document's topic mixture.

pub mod lda;
pub mod special;
pub mod vectorizer;

pub use lda::{FittedLda, LatentDirichletAllocation, LdaParams};
pub use vectorizer::{CountVectorizer, DocumentTermMatrix, SparseRow};

use ndarray::Axis;

use crate::config::TopicModelConfig;
use crate::error::{Error, Result};
use crate::types::{DocumentRecord, DocumentTopics, Topic, TopicModelOutput};

/// Fits a topic model from scratch on each call
#[derive(Debug, Clone)]
pub struct TopicModelTrainer {
    config: TopicModelConfig,
}

impl TopicModelTrainer {
    pub fn new(config: TopicModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TopicModelConfig {
        &self.config
    }

    /// Train on the error-free records; errored ones are ignored
    pub fn train(&self, records: &[DocumentRecord]) -> Result<TopicModelOutput> {
        let corpus: Vec<&DocumentRecord> = records
            .iter()
            .filter(|r| r.is_ok())
            .filter(|r| r.filtered_text.as_deref().is_some_and(|t| !t.is_empty()))
            .collect();
        if corpus.is_empty() {
            return Err(Error::EmptyCorpus);
        }

        let texts: Vec<&str> = corpus
            .iter()
            .filter_map(|r| r.filtered_text.as_deref())
            .collect();
        let vectorizer =
            CountVectorizer::new(self.config.ngram_range, self.config.min_df, self.config.max_df);
        let dtm = vectorizer.fit_transform(&texts)?;

        tracing::info!(
            "Training {} topics on {} documents ({} terms)",
            self.config.n_topics,
            dtm.n_documents(),
            dtm.n_terms()
        );

        let model = LatentDirichletAllocation::new(LdaParams::from(&self.config)).fit(&dtm)?;

        let topics = model
            .top_terms(self.config.top_words)
            .into_iter()
            .enumerate()
            .map(|(index, ranked)| Topic {
                index,
                terms: ranked
                    .into_iter()
                    .map(|(term, weight)| (dtm.vocabulary[term].clone(), weight))
                    .collect(),
            })
            .collect();

        let doc_topic = model.transform(&dtm);
        let documents = corpus
            .iter()
            .zip(doc_topic.axis_iter(Axis(0)))
            .map(|(record, weights)| DocumentTopics {
                identity: record.identity.clone(),
                weights: weights.to_vec(),
            })
            .collect();

        Ok(TopicModelOutput {
            topics,
            documents,
            vocabulary_size: dtm.n_terms(),
            iterations: model.iterations,
            perplexity: model.perplexity,
        })
    }
}
