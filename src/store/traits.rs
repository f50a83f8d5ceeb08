//! Backend-agnostic `Store` trait — the persistence interface the scoring
//! core requires.
//!
//! The core never talks SQL. It needs the upsert/read/count operations below
//! plus the atomic active-version flip; everything else is the backend's
//! business.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::lead::{LeadRecord, ScoredLead};
use crate::registry::ModelEntry;

/// Persistence interface for scored leads and the model registry.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Scored leads ────────────────────────────────────────────────

    /// Insert or update a scored lead, keyed by its identifier.
    /// Re-submission replaces the stored record (last writer wins).
    async fn upsert_scored_lead(&self, lead: &ScoredLead) -> Result<(), DatabaseError>;

    /// Look up a scored lead by identifier.
    async fn get_scored_lead(&self, lead_id: &str) -> Result<Option<ScoredLead>, DatabaseError>;

    /// All records with a verified outcome, as training pairs.
    async fn labeled_records(&self) -> Result<Vec<(LeadRecord, bool)>, DatabaseError>;

    /// Authoritative count of distinct labeled records. Always computed from
    /// the stored rows, never from a cached counter.
    async fn feedback_count(&self) -> Result<u64, DatabaseError>;

    /// Total number of scored leads.
    async fn scored_count(&self) -> Result<u64, DatabaseError>;

    // ── Model registry ──────────────────────────────────────────────

    /// Insert a new model version. Versions are immutable once written.
    async fn insert_model_version(&self, entry: &ModelEntry) -> Result<(), DatabaseError>;

    /// The entry currently flagged active, if any.
    async fn get_active_model(&self) -> Result<Option<ModelEntry>, DatabaseError>;

    /// Look up a specific version.
    async fn get_model_version(&self, version: &str) -> Result<Option<ModelEntry>, DatabaseError>;

    /// All stored version strings, oldest first.
    async fn list_model_versions(&self) -> Result<Vec<String>, DatabaseError>;

    /// Atomically make `version` the single active entry. The flip happens in
    /// one transaction: readers observe either the old or the new active
    /// model, never zero or two.
    async fn set_active_version(&self, version: &str) -> Result<(), DatabaseError>;
}
