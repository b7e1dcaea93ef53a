//! Topic model outputs

use serde::{Deserialize, Serialize};

use super::DocumentIdentity;

/// A latent topic and its highest-weighted terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub index: usize,
    /// `(term, weight)` pairs, highest weight first
    pub terms: Vec<(String, f64)>,
}

/// Soft topic membership of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTopics {
    pub identity: DocumentIdentity,
    /// One weight per topic, summing to 1
    pub weights: Vec<f64>,
}

impl DocumentTopics {
    /// Flatten into `(document, topic, weight)` triples
    pub fn weight_rows(&self) -> impl Iterator<Item = DocumentTopicWeight> + '_ {
        self.weights
            .iter()
            .enumerate()
            .map(move |(topic_index, &weight)| DocumentTopicWeight {
                identity: self.identity.clone(),
                topic_index,
                weight,
            })
    }

    /// Index of the heaviest topic
    pub fn dominant_topic(&self) -> Option<usize> {
        self.weights
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }
}

/// One `(document, topic, weight)` association
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTopicWeight {
    pub identity: DocumentIdentity,
    pub topic_index: usize,
    pub weight: f64,
}

/// Everything a fitted model reports back to the caller
///
/// Topic indices are only meaningful within one run: the model is refit from
/// scratch every time and indices may shift as the corpus grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicModelOutput {
    pub topics: Vec<Topic>,
    pub documents: Vec<DocumentTopics>,
    pub vocabulary_size: usize,
    pub iterations: usize,
    pub perplexity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_rows_and_dominant_topic() {
        let doc = DocumentTopics {
            identity: DocumentIdentity::from_canonical("/corpus/a.txt"),
            weights: vec![0.2, 0.7, 0.1],
        };

        let rows: Vec<_> = doc.weight_rows().collect();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.identity == doc.identity));
        assert_eq!(rows.iter().map(|row| row.topic_index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!((rows.iter().map(|row| row.weight).sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(doc.dominant_topic(), Some(1));

        let empty = DocumentTopics {
            identity: doc.identity.clone(),
            weights: Vec::new(),
        };
        assert_eq!(empty.weight_rows().count(), 0);
        assert_eq!(empty.dominant_topic(), None);
    }
}
