//! Scoring workflow — drives one lead through the scoring state machine.
//!
//! VALIDATE → PREPROCESS → SCORE → STORE → LEARN → RESPOND. Every failure is
//! classified into one of the error-taxonomy kinds before it leaves this
//! module, and LEARN never blocks on the retraining it may kick off.

pub mod state;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ScoringConfig;
use crate::error::{EncodingError, Error};
use crate::features::{self, NUMERIC_FEATURES};
use crate::lead::{LeadRecord, RiskCategory, ScoredLead};
use crate::registry::ModelRegistry;
use crate::retraining::RetrainHandle;
use crate::store::Store;

pub use state::Stage;

/// The scored view returned to the caller on the success terminal.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreResponse {
    pub lead_id: String,
    pub conversion_score: f64,
    pub risk_category: RiskCategory,
    pub timestamp: DateTime<Utc>,
    pub model_version: String,
}

/// Orchestrates scoring requests over the registry, the store, and the
/// retraining hand-off.
pub struct ScoringWorkflow {
    store: Arc<dyn Store>,
    registry: Arc<ModelRegistry>,
    retrain: RetrainHandle,
    config: ScoringConfig,
}

impl ScoringWorkflow {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<ModelRegistry>,
        retrain: RetrainHandle,
        config: ScoringConfig,
    ) -> Self {
        Self {
            store,
            registry,
            retrain,
            config,
        }
    }

    /// Score one lead. Exactly one terminal is reached: the scored view, or a
    /// classified error with nothing half-done.
    pub async fn score(&self, record: LeadRecord) -> Result<ScoreResponse, Error> {
        match self.run(&record).await {
            Ok(response) => {
                info!(
                    lead_id = %response.lead_id,
                    score = response.conversion_score,
                    risk = %response.risk_category,
                    model_version = %response.model_version,
                    "Lead scored"
                );
                Ok(response)
            }
            Err((stage, error)) => {
                debug_assert!(stage.can_transition_to(Stage::Error));
                warn!(
                    lead_id = %record.lead_id,
                    stage = %stage,
                    error = %error,
                    "Scoring workflow entered error terminal"
                );
                Err(error)
            }
        }
    }

    /// The linear stage walk. Errors carry the stage they occurred in so the
    /// terminal transition can be checked and logged once, in `score`.
    async fn run(&self, record: &LeadRecord) -> Result<ScoreResponse, (Stage, Error)> {
        // VALIDATE — nothing is persisted past a failure here.
        let mut stage = Stage::Validate;
        record
            .validate()
            .map_err(|e| (stage, Error::from(e)))?;

        // PREPROCESS — encode with the active model's fitted params. An empty
        // registry refuses to serve instead of guessing.
        debug_assert!(stage.can_transition_to(Stage::Preprocess));
        stage = Stage::Preprocess;
        let active = self.registry.get_active().await.map_err(|e| (stage, e))?;
        let vector = features::encode(record, &active.params);
        if let Some(index) = vector.iter().position(|v| !v.is_finite()) {
            let field = NUMERIC_FEATURES
                .get(index)
                .copied()
                .unwrap_or("categorical");
            return Err((
                stage,
                EncodingError::NonFinite {
                    field: field.to_string(),
                }
                .into(),
            ));
        }

        // SCORE — pure inference plus fixed-threshold risk bucketing.
        debug_assert!(stage.can_transition_to(Stage::Score));
        stage = Stage::Score;
        let conversion_score = active.classifier.predict(&vector);
        let risk_category = RiskCategory::from_score(
            conversion_score,
            self.config.high_threshold,
            self.config.medium_threshold,
        );

        // STORE — upsert keyed by identifier; when the record carries a
        // verified outcome, re-read the authoritative labeled count.
        debug_assert!(stage.can_transition_to(Stage::Store));
        stage = Stage::Store;
        let scored = ScoredLead {
            record: record.clone(),
            conversion_score,
            risk_category,
            model_version: active.version.clone(),
            scored_at: Utc::now(),
        };
        self.store
            .upsert_scored_lead(&scored)
            .await
            .map_err(|e| (stage, Error::from(e)))?;

        let feedback_count = if record.outcome.is_known() {
            Some(
                self.store
                    .feedback_count()
                    .await
                    .map_err(|e| (stage, Error::from(e)))?,
            )
        } else {
            None
        };

        // LEARN — hand off to the retraining worker and move on immediately;
        // this stage never waits for the outcome.
        debug_assert!(stage.can_transition_to(Stage::Learn));
        stage = Stage::Learn;
        if let Some(count) = feedback_count {
            if count >= self.config.retraining_threshold {
                if self.retrain.request() {
                    info!(
                        feedback_count = count,
                        threshold = self.config.retraining_threshold,
                        "Feedback threshold reached, background retraining requested"
                    );
                } else {
                    debug!(
                        feedback_count = count,
                        "Feedback threshold reached, but a retraining run is already in flight"
                    );
                }
            }
        }

        // RESPOND
        debug_assert!(stage.can_transition_to(Stage::Respond));
        Ok(ScoreResponse {
            lead_id: scored.record.key().to_string(),
            conversion_score,
            risk_category,
            timestamp: scored.scored_at,
            model_version: scored.model_version,
        })
    }
}
