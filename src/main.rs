use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use lead_score::config::ScoringConfig;
use lead_score::lead::LeadRecord;
use lead_score::registry::ModelRegistry;
use lead_score::retraining::{RetrainingManager, RetrainingState, spawn_retrain_worker};
use lead_score::server::{AppState, routes};
use lead_score::store::{LibSqlStore, Store};
use lead_score::workflow::ScoringWorkflow;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ScoringConfig::from_env()?;

    let db_path: PathBuf = std::env::var("LEAD_SCORE_DB")
        .unwrap_or_else(|_| "./data/lead_score.db".to_string())
        .into();
    let addr = std::env::var("LEAD_SCORE_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

    let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_local(&db_path).await?);
    let registry = Arc::new(ModelRegistry::new(store.clone()));
    let state = Arc::new(RetrainingState::new());
    let retraining = Arc::new(RetrainingManager::new(
        store.clone(),
        registry.clone(),
        config.clone(),
        state,
    ));

    // Without an active model the service starts degraded and refuses to
    // score. A labeled seed file can bootstrap version 1.0.
    if !registry.has_active().await {
        match std::env::var("LEAD_SCORE_SEED") {
            Ok(seed_path) => {
                let corpus = load_seed_corpus(&seed_path)?;
                let version = retraining.train_initial(&corpus).await?;
                tracing::info!(version = %version, seed = %seed_path, "Bootstrapped initial model");
            }
            Err(_) => {
                tracing::warn!(
                    "No active model and no LEAD_SCORE_SEED set; \
                     scoring will return no_active_model until one is trained"
                );
            }
        }
    }

    let (retrain_handle, _worker) = spawn_retrain_worker(retraining.clone());
    let workflow = Arc::new(ScoringWorkflow::new(
        store.clone(),
        registry.clone(),
        retrain_handle,
        config.clone(),
    ));

    let app = routes(AppState {
        workflow,
        registry,
        retraining,
        store,
        started_at: Instant::now(),
    });

    tracing::info!(addr = %addr, "Lead scoring service listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Read a JSON array of lead records and keep the ones with verified
/// outcomes as training pairs.
fn load_seed_corpus(path: &str) -> anyhow::Result<Vec<(LeadRecord, bool)>> {
    let raw = std::fs::read_to_string(path)?;
    let records: Vec<LeadRecord> = serde_json::from_str(&raw)?;
    let corpus: Vec<(LeadRecord, bool)> = records
        .into_iter()
        .filter_map(|record| record.outcome.label().map(|label| (record, label)))
        .collect();
    anyhow::ensure!(
        !corpus.is_empty(),
        "seed file {path} contains no labeled records"
    );
    Ok(corpus)
}
