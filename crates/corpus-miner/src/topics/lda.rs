//! Latent Dirichlet Allocation fitted with batch variational Bayes
//!
//! Follows the usual mean-field scheme: each EM iteration runs a per-document
//! E-step (in parallel over documents) and then refreshes the topic-word
//! pseudo-counts from the accumulated sufficient statistics. Perplexity is
//! evaluated periodically from the variational lower bound.

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Gamma};
use rayon::prelude::*;

use super::special::{digamma, ln_gamma};
use super::vectorizer::{DocumentTermMatrix, SparseRow};
use crate::config::TopicModelConfig;
use crate::error::{Error, Result};

const EPS: f64 = f64::EPSILON;

/// Model hyper-parameters
#[derive(Debug, Clone)]
pub struct LdaParams {
    pub n_topics: usize,
    pub doc_topic_prior: f64,
    pub topic_word_prior: f64,
    pub max_iter: usize,
    pub evaluate_every: usize,
    pub perplexity_tolerance: f64,
    pub max_doc_update_iter: usize,
    pub mean_change_tolerance: f64,
    pub random_seed: u64,
}

impl From<&TopicModelConfig> for LdaParams {
    fn from(config: &TopicModelConfig) -> Self {
        Self {
            n_topics: config.n_topics,
            doc_topic_prior: config.doc_topic_prior,
            topic_word_prior: config.topic_word_prior,
            max_iter: config.max_iter,
            evaluate_every: config.evaluate_every,
            perplexity_tolerance: config.perplexity_tolerance,
            max_doc_update_iter: config.max_doc_update_iter,
            mean_change_tolerance: config.mean_change_tolerance,
            random_seed: config.random_seed,
        }
    }
}

/// A fitted model
#[derive(Debug, Clone)]
pub struct FittedLda {
    params: LdaParams,
    /// Topic-word variational parameters (lambda), `n_topics x n_terms`
    pub components: Array2<f64>,
    exp_dirichlet_component: Array2<f64>,
    pub iterations: usize,
    pub perplexity: f64,
}

/// Result of one E-step
struct EStep {
    doc_topic: Array2<f64>,
    suff_stats: Array2<f64>,
}

/// Batch variational LDA
#[derive(Debug, Clone)]
pub struct LatentDirichletAllocation {
    params: LdaParams,
}

impl LatentDirichletAllocation {
    pub fn new(params: LdaParams) -> Self {
        Self { params }
    }

    pub fn fit(&self, dtm: &DocumentTermMatrix) -> Result<FittedLda> {
        let p = &self.params;
        let mut rng = StdRng::seed_from_u64(p.random_seed);
        let init = Gamma::new(100.0, 0.01)
            .map_err(|e| Error::internal(format!("invalid gamma initializer: {}", e)))?;

        let mut components =
            Array2::from_shape_fn((p.n_topics, dtm.n_terms()), |_| init.sample(&mut rng));
        let mut exp_dirichlet_component = exp_dirichlet_expectation(&components);
        let mut last_perplexity: Option<f64> = None;
        let mut iterations = 0;

        for i in 0..p.max_iter {
            let doc_init: Vec<Vec<f64>> = (0..dtm.n_documents())
                .map(|_| (0..p.n_topics).map(|_| init.sample(&mut rng)).collect())
                .collect();
            let step = self.e_step(dtm, &exp_dirichlet_component, doc_init, true);

            // M-step
            components = &step.suff_stats * &exp_dirichlet_component + p.topic_word_prior;
            exp_dirichlet_component = exp_dirichlet_expectation(&components);
            iterations = i + 1;

            if p.evaluate_every > 0 && iterations % p.evaluate_every == 0 {
                let doc_topic = self
                    .e_step(dtm, &exp_dirichlet_component, self.uniform_init(dtm), false)
                    .doc_topic;
                let perplexity = self.perplexity(dtm, &components, &doc_topic);
                tracing::info!("LDA iteration {}: perplexity {:.4}", iterations, perplexity);

                if let Some(last) = last_perplexity {
                    if (last - perplexity).abs() < p.perplexity_tolerance {
                        break;
                    }
                }
                last_perplexity = Some(perplexity);
            }
        }

        let doc_topic = self
            .e_step(dtm, &exp_dirichlet_component, self.uniform_init(dtm), false)
            .doc_topic;
        let perplexity = self.perplexity(dtm, &components, &doc_topic);
        tracing::info!(
            "LDA fitted: {} topics, {} terms, {} iterations, perplexity {:.4}",
            p.n_topics,
            dtm.n_terms(),
            iterations,
            perplexity
        );

        Ok(FittedLda {
            params: self.params.clone(),
            components,
            exp_dirichlet_component,
            iterations,
            perplexity,
        })
    }

    fn uniform_init(&self, dtm: &DocumentTermMatrix) -> Vec<Vec<f64>> {
        vec![vec![1.0; self.params.n_topics]; dtm.n_documents()]
    }

    fn e_step(
        &self,
        dtm: &DocumentTermMatrix,
        exp_dirichlet_component: &Array2<f64>,
        doc_init: Vec<Vec<f64>>,
        with_suff_stats: bool,
    ) -> EStep {
        e_step(&self.params, dtm, exp_dirichlet_component, doc_init, with_suff_stats)
    }

    /// Perplexity `exp(-bound / word_count)` of the corpus under the model
    fn perplexity(&self, dtm: &DocumentTermMatrix, components: &Array2<f64>, doc_topic: &Array2<f64>) -> f64 {
        let p = &self.params;
        let dirichlet_doc_topic = dirichlet_expectation(doc_topic);
        let dirichlet_component = dirichlet_expectation(components);

        // E[log p(docs | theta, beta)]
        let mut score = 0.0;
        for (d, row) in dtm.rows.iter().enumerate() {
            for (&w, &count) in row.ids.iter().zip(&row.counts) {
                let log_terms: Vec<f64> = (0..p.n_topics)
                    .map(|t| dirichlet_doc_topic[[d, t]] + dirichlet_component[[t, w]])
                    .collect();
                score += count * log_sum_exp(&log_terms);
            }
        }

        // E[log p(theta | alpha) - log q(theta | gamma)]
        score += log_likelihood(p.doc_topic_prior, doc_topic, &dirichlet_doc_topic, p.n_topics);
        // E[log p(beta | eta) - log q(beta | lambda)]
        score += log_likelihood(p.topic_word_prior, components, &dirichlet_component, dtm.n_terms());

        let word_count = dtm.total_count();
        if word_count <= 0.0 {
            return f64::INFINITY;
        }
        (-score / word_count).exp()
    }
}

impl FittedLda {
    /// Normalized document-topic distributions, one row per document
    pub fn transform(&self, dtm: &DocumentTermMatrix) -> Array2<f64> {
        let init = vec![vec![1.0; self.params.n_topics]; dtm.n_documents()];
        let mut doc_topic =
            e_step(&self.params, dtm, &self.exp_dirichlet_component, init, false).doc_topic;
        normalize_rows(&mut doc_topic);
        doc_topic
    }

    /// Topic-word distributions, each row summing to 1
    pub fn topic_word_distribution(&self) -> Array2<f64> {
        let mut distribution = self.components.clone();
        normalize_rows(&mut distribution);
        distribution
    }

    /// Highest-weighted `(term index, weight)` pairs per topic
    pub fn top_terms(&self, n: usize) -> Vec<Vec<(usize, f64)>> {
        self.topic_word_distribution()
            .axis_iter(Axis(0))
            .map(|row| {
                let mut ranked: Vec<(usize, f64)> = row.iter().copied().enumerate().collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
                ranked.truncate(n);
                ranked
            })
            .collect()
    }
}

/// Variational E-step over every document
fn e_step(
    params: &LdaParams,
    dtm: &DocumentTermMatrix,
    exp_dirichlet_component: &Array2<f64>,
    doc_init: Vec<Vec<f64>>,
    with_suff_stats: bool,
) -> EStep {
    let updates: Vec<(Vec<f64>, Vec<f64>)> = dtm
        .rows
        .par_iter()
        .zip(doc_init.into_par_iter())
        .map(|(row, gamma)| update_document(params, row, exp_dirichlet_component, gamma, with_suff_stats))
        .collect();

    let k = params.n_topics;
    let mut doc_topic = Array2::zeros((dtm.n_documents(), k));
    let mut suff_stats = Array2::zeros((k, dtm.n_terms()));
    for (d, ((gamma, stats), row)) in updates.into_iter().zip(&dtm.rows).enumerate() {
        for (t, value) in gamma.into_iter().enumerate() {
            doc_topic[[d, t]] = value;
        }
        if with_suff_stats {
            let n = row.ids.len();
            for t in 0..k {
                for (j, &w) in row.ids.iter().enumerate() {
                    suff_stats[[t, w]] += stats[t * n + j];
                }
            }
        }
    }

    EStep {
        doc_topic,
        suff_stats,
    }
}

/// Fixed-point iteration on one document's topic posterior
///
/// Returns the posterior and, when requested, its sufficient statistics laid
/// out `topic * n_ids + j`.
fn update_document(
    params: &LdaParams,
    row: &SparseRow,
    exp_dirichlet_component: &Array2<f64>,
    mut gamma: Vec<f64>,
    with_suff_stats: bool,
) -> (Vec<f64>, Vec<f64>) {
    let k = params.n_topics;
    let n = row.ids.len();

    let mut exp_topic_word = vec![0.0; k * n];
    for t in 0..k {
        for (j, &w) in row.ids.iter().enumerate() {
            exp_topic_word[t * n + j] = exp_dirichlet_component[[t, w]];
        }
    }

    let mut exp_doc_topic = exp_dirichlet_expectation_1d(&gamma);
    let mut norm_phi = phi_norm(&exp_doc_topic, &exp_topic_word, n);

    for _ in 0..params.max_doc_update_iter {
        let last = gamma.clone();
        for t in 0..k {
            let dot: f64 = (0..n)
                .map(|j| row.counts[j] / norm_phi[j] * exp_topic_word[t * n + j])
                .sum();
            gamma[t] = exp_doc_topic[t] * dot + params.doc_topic_prior;
        }
        exp_doc_topic = exp_dirichlet_expectation_1d(&gamma);
        norm_phi = phi_norm(&exp_doc_topic, &exp_topic_word, n);

        let mean_change =
            last.iter().zip(&gamma).map(|(a, b)| (a - b).abs()).sum::<f64>() / k as f64;
        if mean_change < params.mean_change_tolerance {
            break;
        }
    }

    let mut stats = Vec::new();
    if with_suff_stats {
        stats = vec![0.0; k * n];
        for t in 0..k {
            for j in 0..n {
                stats[t * n + j] = exp_doc_topic[t] * row.counts[j] / norm_phi[j];
            }
        }
    }
    (gamma, stats)
}

fn phi_norm(exp_doc_topic: &[f64], exp_topic_word: &[f64], n: usize) -> Vec<f64> {
    (0..n)
        .map(|j| {
            exp_doc_topic
                .iter()
                .enumerate()
                .map(|(t, e)| e * exp_topic_word[t * n + j])
                .sum::<f64>()
                + EPS
        })
        .collect()
}

/// `E[log x]` for `x ~ Dir(alpha)`, row by row
fn dirichlet_expectation(alpha: &Array2<f64>) -> Array2<f64> {
    let mut out = alpha.mapv(digamma);
    for (mut row, source) in out.axis_iter_mut(Axis(0)).zip(alpha.axis_iter(Axis(0))) {
        let psi_sum = digamma(source.sum());
        row -= psi_sum;
    }
    out
}

fn exp_dirichlet_expectation(alpha: &Array2<f64>) -> Array2<f64> {
    dirichlet_expectation(alpha).mapv(f64::exp)
}

fn exp_dirichlet_expectation_1d(alpha: &[f64]) -> Vec<f64> {
    let psi_sum = digamma(alpha.iter().sum());
    alpha.iter().map(|&a| (digamma(a) - psi_sum).exp()).collect()
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

fn log_likelihood(prior: f64, distr: &Array2<f64>, dirichlet_distr: &Array2<f64>, size: usize) -> f64 {
    let ln_gamma_prior = ln_gamma(prior);
    let mut score: f64 = distr
        .iter()
        .zip(dirichlet_distr.iter())
        .map(|(&x, &e)| (prior - x) * e + ln_gamma(x) - ln_gamma_prior)
        .sum();
    let ln_gamma_total_prior = ln_gamma(prior * size as f64);
    for row in distr.axis_iter(Axis(0)) {
        score += ln_gamma_total_prior - ln_gamma(row.sum());
    }
    score
}

fn normalize_rows(matrix: &mut Array2<f64>) {
    for mut row in matrix.axis_iter_mut(Axis(0)) {
        let total = row.sum();
        if total > 0.0 {
            row /= total;
        }
    }
}
