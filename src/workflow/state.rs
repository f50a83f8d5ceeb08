//! Scoring workflow state machine.
//!
//! Strictly linear: VALIDATE → PREPROCESS → SCORE → STORE → LEARN → RESPOND,
//! with ERROR as the only other terminal. Exactly one terminal is reached per
//! invocation.

use serde::{Deserialize, Serialize};

/// A stage of the scoring workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Structural validation of the incoming record.
    Validate,
    /// Feature encoding with the active model's fitted params.
    Preprocess,
    /// Classifier inference and risk bucketing.
    Score,
    /// Upsert of the scored lead (and its label, if any).
    Store,
    /// Feedback-threshold check and retraining hand-off.
    Learn,
    /// Successful terminal: the scored view goes back to the caller.
    Respond,
    /// Failed terminal: a classified error goes back to the caller.
    Error,
}

impl Stage {
    /// The next stage on the success path, if any.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::Validate => Some(Self::Preprocess),
            Self::Preprocess => Some(Self::Score),
            Self::Score => Some(Self::Store),
            Self::Store => Some(Self::Learn),
            Self::Learn => Some(Self::Respond),
            Self::Respond | Self::Error => None,
        }
    }

    /// Check if this stage allows transitioning to another stage.
    pub fn can_transition_to(&self, target: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        // Any processing stage may fail into the error terminal; otherwise
        // only the single linear successor is legal.
        target == Stage::Error || self.next() == Some(target)
    }

    /// Check if this is a terminal stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Respond | Self::Error)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validate => "validate",
            Self::Preprocess => "preprocess",
            Self::Score => "score",
            Self::Store => "store",
            Self::Learn => "learn",
            Self::Respond => "respond",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}
