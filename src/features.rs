//! Feature pipeline — pure transformation from raw lead records to
//! model-ready vectors.
//!
//! `fit` learns scaling statistics and categorical vocabularies from a corpus;
//! `encode` applies them to one record. Same record + same params always
//! yields the same vector, so scores are reproducible and auditable offline.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::lead::LeadRecord;

/// Floor for the engagement-intensity denominator when a lead was contacted
/// today. Changing this breaks score compatibility across model versions.
const EPSILON_FLOOR: f64 = 1e-3;

/// Names of the numeric features, raw then derived, in encoding order.
pub const NUMERIC_FEATURES: [&str; 8] = [
    "age",
    "email_opens",
    "website_visits",
    "content_downloads",
    "days_since_contact",
    "engagement_intensity",
    "recency_weight",
    "interaction_frequency",
];

/// Names of the categorical features, in encoding order.
pub const CATEGORICAL_FEATURES: [&str; 3] = ["location", "industry", "lead_source"];

/// Centering/scaling statistics for one numeric feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub mean: f64,
    pub std: f64,
}

/// Fitted encoding parameters: one `NumericStats` per numeric feature and one
/// ordered vocabulary per categorical feature. Persisted alongside the
/// classifier so old model versions keep scoring identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineParams {
    pub numeric: Vec<NumericStats>,
    pub vocabularies: Vec<Vec<String>>,
}

impl PipelineParams {
    /// Total width of an encoded vector. Each categorical contributes one
    /// slot per vocabulary entry plus one unknown slot.
    pub fn dimension(&self) -> usize {
        let categorical: usize = self.vocabularies.iter().map(|v| v.len() + 1).sum();
        self.numeric.len() + categorical
    }
}

/// Raw + derived numeric values for one record, in `NUMERIC_FEATURES` order.
fn numeric_values(record: &LeadRecord) -> [f64; 8] {
    let opens = f64::from(record.email_opens);
    let visits = f64::from(record.website_visits);
    let downloads = f64::from(record.content_downloads);
    let days = f64::from(record.days_since_contact);

    let engagement_intensity = (opens + visits) / days.max(EPSILON_FLOOR);
    let recency_weight = 1.0 / (1.0 + days);
    let interaction_frequency = downloads / (days + 1.0);

    [
        f64::from(record.age),
        opens,
        visits,
        downloads,
        days,
        engagement_intensity,
        recency_weight,
        interaction_frequency,
    ]
}

/// Categorical values for one record, in `CATEGORICAL_FEATURES` order.
fn categorical_values(record: &LeadRecord) -> [String; 3] {
    [
        record.location.clone(),
        record.industry.clone(),
        record.lead_source.to_string(),
    ]
}

/// Fit encoding parameters from a corpus.
///
/// Numeric features get population mean/std; a constant feature (zero std)
/// falls back to std = 1 so encoding stays finite. Vocabularies are the
/// sorted set of observed values, so fitting is order-independent.
pub fn fit(records: &[LeadRecord]) -> PipelineParams {
    let n = records.len();

    let mut numeric = Vec::with_capacity(NUMERIC_FEATURES.len());
    for i in 0..NUMERIC_FEATURES.len() {
        let values: Vec<f64> = records.iter().map(|r| numeric_values(r)[i]).collect();
        let mean = if n == 0 {
            0.0
        } else {
            values.iter().sum::<f64>() / n as f64
        };
        let variance = if n == 0 {
            0.0
        } else {
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64
        };
        let std = variance.sqrt();
        numeric.push(NumericStats {
            mean,
            std: if std == 0.0 { 1.0 } else { std },
        });
    }

    let mut vocabularies = Vec::with_capacity(CATEGORICAL_FEATURES.len());
    for i in 0..CATEGORICAL_FEATURES.len() {
        let observed: BTreeSet<String> = records
            .iter()
            .map(|r| categorical_values(r)[i].clone())
            .collect();
        vocabularies.push(observed.into_iter().collect());
    }

    PipelineParams {
        numeric,
        vocabularies,
    }
}

/// Encode one record with fitted parameters. Pure; no side effects.
///
/// Categories absent from the fitted vocabulary land in the dedicated
/// unknown slot — an open vocabulary must never crash scoring.
pub fn encode(record: &LeadRecord, params: &PipelineParams) -> Vec<f64> {
    let mut vector = Vec::with_capacity(params.dimension());

    for (value, stats) in numeric_values(record).iter().zip(&params.numeric) {
        vector.push((value - stats.mean) / stats.std);
    }

    for (value, vocabulary) in categorical_values(record).iter().zip(&params.vocabularies) {
        let hit = vocabulary.iter().position(|known| known == value);
        for i in 0..vocabulary.len() {
            vector.push(if hit == Some(i) { 1.0 } else { 0.0 });
        }
        // Unknown slot
        vector.push(if hit.is_none() { 1.0 } else { 0.0 });
    }

    vector
}
