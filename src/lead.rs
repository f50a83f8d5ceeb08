//! Lead data model — raw records, outcomes, risk categories, and scored leads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum length for identifier and free-form text fields.
const MAX_TEXT_LEN: usize = 100;

/// Age bounds accepted for a lead.
const AGE_MIN: u32 = 18;
const AGE_MAX: u32 = 100;

/// Where a lead came from. Closed enumeration — membership is a validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadSource {
    #[serde(rename = "Webinar")]
    Webinar,
    #[serde(rename = "Cold Call")]
    ColdCall,
    #[serde(rename = "Referral")]
    Referral,
    #[serde(rename = "Advertisement")]
    Advertisement,
    #[serde(rename = "Organic")]
    Organic,
    #[serde(rename = "Trade Show")]
    TradeShow,
    #[serde(rename = "Email Campaign")]
    EmailCampaign,
}

impl std::fmt::Display for LeadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Webinar => "Webinar",
            Self::ColdCall => "Cold Call",
            Self::Referral => "Referral",
            Self::Advertisement => "Advertisement",
            Self::Organic => "Organic",
            Self::TradeShow => "Trade Show",
            Self::EmailCampaign => "Email Campaign",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LeadSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Webinar" => Ok(Self::Webinar),
            "Cold Call" => Ok(Self::ColdCall),
            "Referral" => Ok(Self::Referral),
            "Advertisement" => Ok(Self::Advertisement),
            "Organic" => Ok(Self::Organic),
            "Trade Show" => Ok(Self::TradeShow),
            "Email Campaign" => Ok(Self::EmailCampaign),
            _ => Err(format!("Unknown lead source: {s}")),
        }
    }
}

/// Verified conversion outcome for a lead.
///
/// Three-valued on purpose: "we don't know yet" is an explicit state, not a
/// nullable boolean that defaults silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The lead converted.
    Converted,
    /// The lead did not convert.
    Lost,
    /// No verified outcome yet.
    #[default]
    Unknown,
}

impl Outcome {
    /// Whether a verified outcome has been recorded.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// The binary training label, if known.
    pub fn label(&self) -> Option<bool> {
        match self {
            Self::Converted => Some(true),
            Self::Lost => Some(false),
            Self::Unknown => None,
        }
    }

    /// Build an outcome from a stored label column.
    pub fn from_label(label: Option<bool>) -> Self {
        match label {
            Some(true) => Self::Converted,
            Some(false) => Self::Lost,
            None => Self::Unknown,
        }
    }
}

/// Risk/priority bucket derived from a conversion score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    High,
    Medium,
    Low,
}

impl RiskCategory {
    /// Bucket a score using fixed thresholds: `>= high` is high,
    /// `>= medium` is medium, anything below is low.
    pub fn from_score(score: f64, high: f64, medium: f64) -> Self {
        if score >= high {
            Self::High
        } else if score >= medium {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RiskCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Unknown risk category: {s}")),
        }
    }
}

/// A single field-level validation failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Raw incoming lead record. `lead_id` is the upsert key: re-submission with
/// the same identifier replaces the stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRecord {
    pub lead_id: String,
    pub age: u32,
    pub location: String,
    pub industry: String,
    pub email_opens: u32,
    pub website_visits: u32,
    pub content_downloads: u32,
    pub days_since_contact: u32,
    pub lead_source: LeadSource,
    /// Verified outcome, if the caller has one to report.
    #[serde(default)]
    pub outcome: Outcome,
}

impl LeadRecord {
    /// Check structural constraints, collecting every failing field.
    ///
    /// The transport guarantees the record parses; this checks bounds and
    /// emptiness the type system can't.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut fields = Vec::new();

        if self.lead_id.trim().is_empty() {
            fields.push(FieldError::new("lead_id", "must not be empty"));
        } else if self.lead_id.len() > MAX_TEXT_LEN {
            fields.push(FieldError::new(
                "lead_id",
                format!("must be at most {MAX_TEXT_LEN} characters"),
            ));
        }

        if !(AGE_MIN..=AGE_MAX).contains(&self.age) {
            fields.push(FieldError::new(
                "age",
                format!("must be between {AGE_MIN} and {AGE_MAX}"),
            ));
        }

        for (name, value) in [("location", &self.location), ("industry", &self.industry)] {
            if value.trim().is_empty() {
                fields.push(FieldError::new(name, "must not be empty"));
            } else if value.len() > MAX_TEXT_LEN {
                fields.push(FieldError::new(
                    name,
                    format!("must be at most {MAX_TEXT_LEN} characters"),
                ));
            }
        }

        if fields.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { fields })
        }
    }

    /// The upsert key, trimmed of surrounding whitespace.
    pub fn key(&self) -> &str {
        self.lead_id.trim()
    }
}

/// A lead record augmented with its latest score. Owned by persistence;
/// updated in place on every re-score of the same identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredLead {
    pub record: LeadRecord,
    pub conversion_score: f64,
    pub risk_category: RiskCategory,
    pub model_version: String,
    pub scored_at: DateTime<Utc>,
}
