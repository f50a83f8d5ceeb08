//! Binary classifier and training — logistic regression with a deterministic
//! held-out evaluation.
//!
//! Training is full-batch gradient descent with balanced class weights. The
//! only randomized step is the train/test split, which uses a fixed seed so a
//! given corpus always produces the same model and the same metrics.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::RetrainingError;
use crate::features::{self, PipelineParams};
use crate::lead::LeadRecord;

/// Minimum labeled records before a fit is attempted.
pub const MIN_TRAINING_SAMPLES: usize = 10;

/// Minimum records per class (keeps the stratified split non-degenerate).
const MIN_CLASS_SAMPLES: usize = 2;

/// Fixed seed for the train/test shuffle.
const SPLIT_SEED: u64 = 42;

/// Gradient descent hyperparameters.
const EPOCHS: usize = 300;
const LEARNING_RATE: f64 = 0.1;
const L2_PENALTY: f64 = 1e-3;

/// Share of the test set counted as "top" for precision/recall.
const TOP_FRACTION: f64 = 0.2;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Logistic regression over an encoded feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LogisticModel {
    /// Conversion probability in [0, 1]. Pure and deterministic for fixed
    /// parameters.
    pub fn predict(&self, vector: &[f64]) -> f64 {
        debug_assert_eq!(vector.len(), self.weights.len());
        let logit: f64 = self
            .weights
            .iter()
            .zip(vector)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias;
        sigmoid(logit)
    }
}

/// Held-out evaluation metrics for a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Area under the ROC curve on the held-out split.
    pub auc: f64,
    /// Precision over the top 20% of held-out records by predicted score.
    pub precision_top20: f64,
    /// Recall over the top 20% of held-out records by predicted score.
    pub recall_top20: f64,
    /// Records the model was fitted on (excludes the held-out split).
    pub training_samples: usize,
}

/// A freshly trained classifier with its fitted pipeline and metrics,
/// not yet registered.
#[derive(Debug, Clone)]
pub struct TrainedCandidate {
    pub classifier: LogisticModel,
    pub params: PipelineParams,
    pub metrics: ModelMetrics,
}

/// Fit a pipeline and classifier on a labeled corpus and evaluate on a
/// held-out split.
///
/// `train_split` is the training share (e.g. 0.8). Fails when the corpus is
/// too small or single-class; callers treat that as recoverable.
pub fn train_candidate(
    corpus: &[(LeadRecord, bool)],
    train_split: f64,
) -> Result<TrainedCandidate, RetrainingError> {
    let positives = corpus.iter().filter(|(_, label)| *label).count();
    let negatives = corpus.len() - positives;

    if corpus.len() < MIN_TRAINING_SAMPLES {
        return Err(RetrainingError::TrainingFailure(format!(
            "corpus too small: {} labeled records, need {MIN_TRAINING_SAMPLES}",
            corpus.len()
        )));
    }
    if positives < MIN_CLASS_SAMPLES || negatives < MIN_CLASS_SAMPLES {
        return Err(RetrainingError::TrainingFailure(format!(
            "corpus too imbalanced: {positives} positive / {negatives} negative, \
             need {MIN_CLASS_SAMPLES} of each"
        )));
    }

    let (train_idx, test_idx) = stratified_split(corpus, train_split);

    // Pipeline statistics come from the training split only; the held-out
    // records must not leak into the fitted parameters.
    let train_records: Vec<LeadRecord> = train_idx.iter().map(|&i| corpus[i].0.clone()).collect();
    let params = features::fit(&train_records);

    let train_set: Vec<(Vec<f64>, bool)> = train_idx
        .iter()
        .map(|&i| (features::encode(&corpus[i].0, &params), corpus[i].1))
        .collect();
    let classifier = fit_logistic(&train_set, params.dimension());

    let (test_labels, test_scores): (Vec<bool>, Vec<f64>) = test_idx
        .iter()
        .map(|&i| {
            let vector = features::encode(&corpus[i].0, &params);
            (corpus[i].1, classifier.predict(&vector))
        })
        .unzip();

    let (precision_top20, recall_top20) = top_fraction_metrics(&test_labels, &test_scores);
    let metrics = ModelMetrics {
        auc: roc_auc(&test_labels, &test_scores),
        precision_top20,
        recall_top20,
        training_samples: train_set.len(),
    };

    Ok(TrainedCandidate {
        classifier,
        params,
        metrics,
    })
}

/// Split indices per class with a seeded shuffle, keeping `train_split` of
/// each class in the training set and at least one record of each in the
/// held-out set.
fn stratified_split(corpus: &[(LeadRecord, bool)], train_split: f64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(SPLIT_SEED);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in [true, false] {
        let mut indices: Vec<usize> = corpus
            .iter()
            .enumerate()
            .filter(|(_, (_, label))| *label == class)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            continue;
        }
        indices.shuffle(&mut rng);

        let take = ((indices.len() as f64 * train_split) as usize).min(indices.len() - 1);
        train.extend_from_slice(&indices[..take]);
        test.extend_from_slice(&indices[take..]);
    }

    (train, test)
}

/// Full-batch gradient descent with balanced class weights.
fn fit_logistic(train_set: &[(Vec<f64>, bool)], dimension: usize) -> LogisticModel {
    let n = train_set.len() as f64;
    let positives = train_set.iter().filter(|(_, label)| *label).count() as f64;
    let negatives = n - positives;
    let weight_pos = n / (2.0 * positives);
    let weight_neg = n / (2.0 * negatives);

    let mut weights = vec![0.0; dimension];
    let mut bias = 0.0;

    for _ in 0..EPOCHS {
        let mut grad_w = vec![0.0; dimension];
        let mut grad_b = 0.0;

        for (vector, label) in train_set {
            let target = if *label { 1.0 } else { 0.0 };
            let class_weight = if *label { weight_pos } else { weight_neg };
            let predicted = sigmoid(
                weights
                    .iter()
                    .zip(vector)
                    .map(|(w, x)| w * x)
                    .sum::<f64>()
                    + bias,
            );
            let error = (predicted - target) * class_weight;

            for (g, x) in grad_w.iter_mut().zip(vector) {
                *g += error * x;
            }
            grad_b += error;
        }

        for (w, g) in weights.iter_mut().zip(&grad_w) {
            *w -= LEARNING_RATE * (g / n + L2_PENALTY * *w);
        }
        bias -= LEARNING_RATE * grad_b / n;
    }

    LogisticModel { weights, bias }
}

/// Rank-based AUC (Mann-Whitney) with midranks for tied scores.
/// A single-class sample cannot be ranked and scores 0.5.
pub fn roc_auc(labels: &[bool], scores: &[f64]) -> f64 {
    let n_pos = labels.iter().filter(|l| **l).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Midrank for the tie run [i, j]; ranks are 1-based.
        let midrank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = midrank;
        }
        i = j + 1;
    }

    let rank_sum_pos: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(label, _)| **label)
        .map(|(_, rank)| rank)
        .sum();

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    (rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// Precision and recall restricted to the ceil(20%) highest-scored records.
fn top_fraction_metrics(labels: &[bool], scores: &[f64]) -> (f64, f64) {
    if labels.is_empty() {
        return (0.0, 0.0);
    }

    let k = ((labels.len() as f64 * TOP_FRACTION).ceil() as usize).max(1);
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let true_positives = order[..k].iter().filter(|&&i| labels[i]).count() as f64;
    let total_positives = labels.iter().filter(|l| **l).count() as f64;

    let precision = true_positives / k as f64;
    let recall = if total_positives == 0.0 {
        0.0
    } else {
        true_positives / total_positives
    };
    (precision, recall)
}
