//! Model registry — versioning, activation, and the active-model cache.
//!
//! Every trained model becomes a new immutable registry row; promotion flips
//! the single active flag in one store transaction and then swaps the
//! in-memory cache, so concurrent scoring requests observe either the old or
//! the new champion, never a half-updated state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{Error, RegistryError};
use crate::features::PipelineParams;
use crate::model::{LogisticModel, ModelMetrics, TrainedCandidate};
use crate::store::Store;

/// Version assigned by the first bootstrap training.
pub const INITIAL_VERSION: &str = "1.0";

/// Serialized classifier plus its fitted pipeline parameters. Stored as one
/// JSON document so a version always scores with the pipeline it was
/// trained with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPayload {
    pub classifier: LogisticModel,
    pub params: PipelineParams,
}

/// A registry record. Never mutated after creation; a new version is always
/// a new row, preserving the full audit history.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub version: String,
    pub payload: ModelPayload,
    pub metrics: ModelMetrics,
    pub trained_at: DateTime<Utc>,
    pub is_active: bool,
}

/// The active model as served to the scoring path.
#[derive(Debug, Clone)]
pub struct ActiveModel {
    pub version: String,
    pub classifier: LogisticModel,
    pub params: PipelineParams,
    pub metrics: ModelMetrics,
    pub trained_at: DateTime<Utc>,
}

impl From<ModelEntry> for ActiveModel {
    fn from(entry: ModelEntry) -> Self {
        Self {
            version: entry.version,
            classifier: entry.payload.classifier,
            params: entry.payload.params,
            metrics: entry.metrics,
            trained_at: entry.trained_at,
        }
    }
}

/// Store-backed registry with an in-memory cache of the active entry.
pub struct ModelRegistry {
    store: Arc<dyn Store>,
    active: RwLock<Option<Arc<ActiveModel>>>,
}

impl ModelRegistry {
    /// Create a registry over the given store. The active-model cache fills
    /// lazily on first read.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            active: RwLock::new(None),
        }
    }

    /// The currently active model.
    ///
    /// Fails with `NoActiveModel` when the registry is empty — scoring must
    /// refuse to serve rather than guess.
    pub async fn get_active(&self) -> Result<Arc<ActiveModel>, Error> {
        if let Some(active) = self.active.read().await.clone() {
            return Ok(active);
        }

        // Cache miss: load through from the store (first read after startup).
        let entry = self
            .store
            .get_active_model()
            .await?
            .ok_or(RegistryError::NoActiveModel)?;
        let active = Arc::new(ActiveModel::from(entry));

        let mut cache = self.active.write().await;
        *cache = Some(active.clone());
        Ok(active)
    }

    /// Whether any model is active (health probe; never errors on empty).
    pub async fn has_active(&self) -> bool {
        self.get_active().await.is_ok()
    }

    /// Register a trained candidate as a new, inactive entry with the next
    /// minor version. Returns the assigned version string.
    pub async fn register(&self, candidate: &TrainedCandidate) -> Result<String, Error> {
        let version = self.next_version().await?;
        let entry = ModelEntry {
            version: version.clone(),
            payload: ModelPayload {
                classifier: candidate.classifier.clone(),
                params: candidate.params.clone(),
            },
            metrics: candidate.metrics.clone(),
            trained_at: Utc::now(),
            is_active: false,
        };
        self.store.insert_model_version(&entry).await?;

        info!(
            version = %version,
            auc = entry.metrics.auc,
            training_samples = entry.metrics.training_samples,
            "Registered model version"
        );
        Ok(version)
    }

    /// Atomically make `version` the active entry and refresh the cache.
    pub async fn activate(&self, version: &str) -> Result<(), Error> {
        let entry = self
            .store
            .get_model_version(version)
            .await?
            .ok_or_else(|| RegistryError::VersionNotFound(version.to_string()))?;

        self.store.set_active_version(version).await?;

        let mut cache = self.active.write().await;
        *cache = Some(Arc::new(ActiveModel::from(entry)));

        info!(version = %version, "Activated model version");
        Ok(())
    }

    /// Compute the next version string: the highest parseable stored version
    /// with its minor component bumped, or the initial version for an empty
    /// registry. The major component only changes manually.
    async fn next_version(&self) -> Result<String, Error> {
        let versions = self.store.list_model_versions().await?;
        let highest = versions
            .iter()
            .filter_map(|v| parse_version(v))
            .max();

        Ok(match highest {
            Some((major, minor)) => format!("{major}.{}", minor + 1),
            None => INITIAL_VERSION.to_string(),
        })
    }
}

/// Parse a `major.minor` version string.
fn parse_version(version: &str) -> Option<(u32, u32)> {
    let (major, minor) = version.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features;
    use crate::lead::{LeadRecord, LeadSource, Outcome};
    use crate::store::LibSqlStore;

    fn candidate(auc: f64) -> TrainedCandidate {
        let corpus = vec![LeadRecord {
            lead_id: "L1".into(),
            age: 30,
            location: "Miami".into(),
            industry: "Insurance".into(),
            email_opens: 4,
            website_visits: 2,
            content_downloads: 1,
            days_since_contact: 6,
            lead_source: LeadSource::Referral,
            outcome: Outcome::Unknown,
        }];
        let params = features::fit(&corpus);
        TrainedCandidate {
            classifier: LogisticModel {
                weights: vec![0.0; params.dimension()],
                bias: 0.0,
            },
            params,
            metrics: ModelMetrics {
                auc,
                precision_top20: 0.5,
                recall_top20: 0.5,
                training_samples: 1,
            },
        }
    }

    async fn test_registry() -> (ModelRegistry, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        (ModelRegistry::new(store.clone()), store)
    }

    #[tokio::test]
    async fn empty_registry_has_no_active_model() {
        let (registry, _) = test_registry().await;
        let err = registry.get_active().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Registry(RegistryError::NoActiveModel)
        ));
        assert!(!registry.has_active().await);
    }

    #[tokio::test]
    async fn first_registration_gets_initial_version() {
        let (registry, _) = test_registry().await;
        let version = registry.register(&candidate(0.8)).await.unwrap();
        assert_eq!(version, INITIAL_VERSION);
    }

    #[tokio::test]
    async fn versions_bump_minor_component() {
        let (registry, _) = test_registry().await;
        assert_eq!(registry.register(&candidate(0.8)).await.unwrap(), "1.0");
        assert_eq!(registry.register(&candidate(0.81)).await.unwrap(), "1.1");
        assert_eq!(registry.register(&candidate(0.82)).await.unwrap(), "1.2");
    }

    #[tokio::test]
    async fn register_does_not_activate() {
        let (registry, _) = test_registry().await;
        registry.register(&candidate(0.8)).await.unwrap();
        assert!(!registry.has_active().await);
    }

    #[tokio::test]
    async fn activation_swaps_active_model() {
        let (registry, _) = test_registry().await;
        let v1 = registry.register(&candidate(0.8)).await.unwrap();
        registry.activate(&v1).await.unwrap();
        assert_eq!(registry.get_active().await.unwrap().version, v1);

        let v2 = registry.register(&candidate(0.9)).await.unwrap();
        registry.activate(&v2).await.unwrap();
        let active = registry.get_active().await.unwrap();
        assert_eq!(active.version, v2);
        assert!((active.metrics.auc - 0.9).abs() < 1e-12);
    }

    #[tokio::test]
    async fn exactly_one_entry_active_after_each_promotion() {
        let (registry, store) = test_registry().await;
        for _ in 0..3 {
            let version = registry.register(&candidate(0.8)).await.unwrap();
            registry.activate(&version).await.unwrap();

            let mut active_count = 0;
            for version in store.list_model_versions().await.unwrap() {
                let entry = store.get_model_version(&version).await.unwrap().unwrap();
                if entry.is_active {
                    active_count += 1;
                }
            }
            assert_eq!(active_count, 1);
        }
    }

    #[tokio::test]
    async fn activating_unknown_version_fails() {
        let (registry, _) = test_registry().await;
        let err = registry.activate("9.9").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Registry(RegistryError::VersionNotFound(_))
        ));
    }

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version("1.0"), Some((1, 0)));
        assert_eq!(parse_version("2.17"), Some((2, 17)));
        assert_eq!(parse_version("abc"), None);
        assert_eq!(parse_version("1.x"), None);
    }
}
