//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. The in-memory flavor backs
//! most of the test suite.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::DatabaseError;
use crate::lead::{LeadRecord, Outcome, ScoredLead};
use crate::registry::{ModelEntry, ModelPayload};
use crate::store::migrations;
use crate::store::traits::Store;

/// libSQL store backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn query_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// Column order for scored-lead queries.
const LEAD_COLUMNS: &str = "lead_id, age, location, industry, email_opens, website_visits, \
     content_downloads, days_since_contact, lead_source, conversion_score, risk_category, \
     outcome, model_version, scored_at";

/// Map a libsql row (in `LEAD_COLUMNS` order) to a ScoredLead.
fn row_to_scored_lead(row: &libsql::Row) -> Result<ScoredLead, DatabaseError> {
    let lead_id: String = row.get(0).map_err(query_err)?;
    let age: i64 = row.get(1).map_err(query_err)?;
    let location: String = row.get(2).map_err(query_err)?;
    let industry: String = row.get(3).map_err(query_err)?;
    let email_opens: i64 = row.get(4).map_err(query_err)?;
    let website_visits: i64 = row.get(5).map_err(query_err)?;
    let content_downloads: i64 = row.get(6).map_err(query_err)?;
    let days_since_contact: i64 = row.get(7).map_err(query_err)?;
    let lead_source: String = row.get(8).map_err(query_err)?;
    let conversion_score: f64 = row.get(9).map_err(query_err)?;
    let risk_category: String = row.get(10).map_err(query_err)?;
    let outcome = match row.get_value(11).map_err(query_err)? {
        libsql::Value::Integer(v) => Some(v != 0),
        _ => None,
    };
    let model_version: String = row.get(12).map_err(query_err)?;
    let scored_at: String = row.get(13).map_err(query_err)?;

    let record = LeadRecord {
        lead_id,
        age: age as u32,
        location,
        industry,
        email_opens: email_opens as u32,
        website_visits: website_visits as u32,
        content_downloads: content_downloads as u32,
        days_since_contact: days_since_contact as u32,
        lead_source: lead_source.parse().map_err(DatabaseError::Serialization)?,
        outcome: Outcome::from_label(outcome),
    };

    Ok(ScoredLead {
        record,
        conversion_score,
        risk_category: risk_category.parse().map_err(DatabaseError::Serialization)?,
        model_version,
        scored_at: parse_datetime(&scored_at),
    })
}

/// Column order for model queries.
const MODEL_COLUMNS: &str =
    "version, payload, auc, precision_top20, recall_top20, training_samples, trained_at, is_active";

/// Map a libsql row (in `MODEL_COLUMNS` order) to a ModelEntry.
fn row_to_model_entry(row: &libsql::Row) -> Result<ModelEntry, DatabaseError> {
    let version: String = row.get(0).map_err(query_err)?;
    let payload_json: String = row.get(1).map_err(query_err)?;
    let auc: f64 = row.get(2).map_err(query_err)?;
    let precision_top20: f64 = row.get(3).map_err(query_err)?;
    let recall_top20: f64 = row.get(4).map_err(query_err)?;
    let training_samples: i64 = row.get(5).map_err(query_err)?;
    let trained_at: String = row.get(6).map_err(query_err)?;
    let is_active: i64 = row.get(7).map_err(query_err)?;

    let payload: ModelPayload = serde_json::from_str(&payload_json).map_err(|e| {
        DatabaseError::Serialization(format!("model payload for {version}: {e}"))
    })?;

    Ok(ModelEntry {
        version,
        payload,
        metrics: crate::model::ModelMetrics {
            auc,
            precision_top20,
            recall_top20,
            training_samples: training_samples as usize,
        },
        trained_at: parse_datetime(&trained_at),
        is_active: is_active != 0,
    })
}

#[async_trait]
impl Store for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&self.conn).await
    }

    async fn upsert_scored_lead(&self, lead: &ScoredLead) -> Result<(), DatabaseError> {
        let record = &lead.record;
        let outcome = match record.outcome.label() {
            Some(label) => libsql::Value::Integer(i64::from(label)),
            None => libsql::Value::Null,
        };
        self.conn
            .execute(
                "INSERT INTO lead_scores (
                    lead_id, age, location, industry, email_opens, website_visits,
                    content_downloads, days_since_contact, lead_source, conversion_score,
                    risk_category, outcome, model_version, scored_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                ON CONFLICT(lead_id) DO UPDATE SET
                    age = excluded.age,
                    location = excluded.location,
                    industry = excluded.industry,
                    email_opens = excluded.email_opens,
                    website_visits = excluded.website_visits,
                    content_downloads = excluded.content_downloads,
                    days_since_contact = excluded.days_since_contact,
                    lead_source = excluded.lead_source,
                    conversion_score = excluded.conversion_score,
                    risk_category = excluded.risk_category,
                    outcome = excluded.outcome,
                    model_version = excluded.model_version,
                    scored_at = excluded.scored_at,
                    updated_at = datetime('now')",
                params![
                    record.key(),
                    record.age as i64,
                    record.location.as_str(),
                    record.industry.as_str(),
                    record.email_opens as i64,
                    record.website_visits as i64,
                    record.content_downloads as i64,
                    record.days_since_contact as i64,
                    record.lead_source.to_string(),
                    lead.conversion_score,
                    lead.risk_category.to_string(),
                    outcome,
                    lead.model_version.as_str(),
                    lead.scored_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_scored_lead(&self, lead_id: &str) -> Result<Option<ScoredLead>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM lead_scores WHERE lead_id = ?1"),
                params![lead_id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_scored_lead(&row)?)),
            None => Ok(None),
        }
    }

    async fn labeled_records(&self) -> Result<Vec<(LeadRecord, bool)>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {LEAD_COLUMNS} FROM lead_scores \
                     WHERE outcome IS NOT NULL ORDER BY lead_id"
                ),
                (),
            )
            .await
            .map_err(query_err)?;

        let mut corpus = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let lead = row_to_scored_lead(&row)?;
            if let Some(label) = lead.record.outcome.label() {
                corpus.push((lead.record, label));
            }
        }
        Ok(corpus)
    }

    async fn feedback_count(&self) -> Result<u64, DatabaseError> {
        count_query(
            &self.conn,
            "SELECT COUNT(*) FROM lead_scores WHERE outcome IS NOT NULL",
        )
        .await
    }

    async fn scored_count(&self) -> Result<u64, DatabaseError> {
        count_query(&self.conn, "SELECT COUNT(*) FROM lead_scores").await
    }

    async fn insert_model_version(&self, entry: &ModelEntry) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(&entry.payload)
            .map_err(|e| DatabaseError::Serialization(format!("model payload: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO models (
                    version, payload, auc, precision_top20, recall_top20,
                    training_samples, trained_at, is_active
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.version.as_str(),
                    payload,
                    entry.metrics.auc,
                    entry.metrics.precision_top20,
                    entry.metrics.recall_top20,
                    entry.metrics.training_samples as i64,
                    entry.trained_at.to_rfc3339(),
                    i64::from(entry.is_active),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_active_model(&self) -> Result<Option<ModelEntry>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {MODEL_COLUMNS} FROM models WHERE is_active = 1 LIMIT 1"),
                (),
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_model_entry(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_model_version(&self, version: &str) -> Result<Option<ModelEntry>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {MODEL_COLUMNS} FROM models WHERE version = ?1"),
                params![version],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_model_entry(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_model_versions(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn
            .query("SELECT version FROM models ORDER BY created_at, version", ())
            .await
            .map_err(query_err)?;

        let mut versions = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            versions.push(row.get(0).map_err(query_err)?);
        }
        Ok(versions)
    }

    async fn set_active_version(&self, version: &str) -> Result<(), DatabaseError> {
        // Single transaction: deactivate the old champion and activate the
        // new one so no reader ever sees zero or two active rows.
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to begin transaction: {e}")))?;

        tx.execute("UPDATE models SET is_active = 0 WHERE is_active = 1", ())
            .await
            .map_err(query_err)?;

        let activated = tx
            .execute(
                "UPDATE models SET is_active = 1 WHERE version = ?1",
                params![version],
            )
            .await
            .map_err(query_err)?;

        if activated != 1 {
            tx.rollback().await.map_err(query_err)?;
            return Err(DatabaseError::NotFound {
                entity: "model".into(),
                id: version.to_string(),
            });
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to commit activation: {e}")))?;
        Ok(())
    }
}

async fn count_query(conn: &Connection, sql: &str) -> Result<u64, DatabaseError> {
    let mut rows = conn.query(sql, ()).await.map_err(query_err)?;
    let row = rows
        .next()
        .await
        .map_err(query_err)?
        .ok_or_else(|| DatabaseError::Query("count query returned no rows".into()))?;
    let count: i64 = row.get(0).map_err(query_err)?;
    Ok(count.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::{LeadSource, RiskCategory};

    fn scored(id: &str, outcome: Outcome, score: f64) -> ScoredLead {
        ScoredLead {
            record: LeadRecord {
                lead_id: id.into(),
                age: 41,
                location: "Seattle".into(),
                industry: "Logistics".into(),
                email_opens: 9,
                website_visits: 4,
                content_downloads: 2,
                days_since_contact: 11,
                lead_source: LeadSource::EmailCampaign,
                outcome,
            },
            conversion_score: score,
            risk_category: RiskCategory::from_score(score, 0.7, 0.4),
            model_version: "1.0".into(),
            scored_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_and_get_round_trip() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let lead = scored("L-1", Outcome::Converted, 0.82);
        store.upsert_scored_lead(&lead).await.unwrap();

        let loaded = store.get_scored_lead("L-1").await.unwrap().unwrap();
        assert_eq!(loaded.record.lead_id, "L-1");
        assert_eq!(loaded.record.lead_source, LeadSource::EmailCampaign);
        assert_eq!(loaded.record.outcome, Outcome::Converted);
        assert_eq!(loaded.risk_category, RiskCategory::High);
        assert!((loaded.conversion_score - 0.82).abs() < 1e-12);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store
            .upsert_scored_lead(&scored("L-1", Outcome::Unknown, 0.3))
            .await
            .unwrap();

        let mut updated = scored("L-1", Outcome::Lost, 0.6);
        updated.record.email_opens = 99;
        store.upsert_scored_lead(&updated).await.unwrap();

        assert_eq!(store.scored_count().await.unwrap(), 1);
        let loaded = store.get_scored_lead("L-1").await.unwrap().unwrap();
        assert_eq!(loaded.record.email_opens, 99);
        assert_eq!(loaded.record.outcome, Outcome::Lost);
    }

    #[tokio::test]
    async fn feedback_count_tracks_current_labeled_state() {
        let store = LibSqlStore::new_memory().await.unwrap();
        assert_eq!(store.feedback_count().await.unwrap(), 0);

        store
            .upsert_scored_lead(&scored("L-1", Outcome::Converted, 0.8))
            .await
            .unwrap();
        store
            .upsert_scored_lead(&scored("L-2", Outcome::Unknown, 0.5))
            .await
            .unwrap();
        store
            .upsert_scored_lead(&scored("L-3", Outcome::Lost, 0.2))
            .await
            .unwrap();
        assert_eq!(store.feedback_count().await.unwrap(), 2);

        // Overwriting a labeled lead with an unknown outcome removes it from
        // the labeled state — the count reflects rows, not history.
        store
            .upsert_scored_lead(&scored("L-1", Outcome::Unknown, 0.8))
            .await
            .unwrap();
        assert_eq!(store.feedback_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn labeled_records_exclude_unknown() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store
            .upsert_scored_lead(&scored("L-1", Outcome::Converted, 0.8))
            .await
            .unwrap();
        store
            .upsert_scored_lead(&scored("L-2", Outcome::Unknown, 0.5))
            .await
            .unwrap();
        store
            .upsert_scored_lead(&scored("L-3", Outcome::Lost, 0.2))
            .await
            .unwrap();

        let corpus = store.labeled_records().await.unwrap();
        assert_eq!(corpus.len(), 2);
        assert!(corpus.iter().any(|(r, label)| r.lead_id == "L-1" && *label));
        assert!(corpus.iter().any(|(r, label)| r.lead_id == "L-3" && !*label));
    }

    #[tokio::test]
    async fn activating_missing_version_rolls_back() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let err = store.set_active_version("3.1").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }
}
