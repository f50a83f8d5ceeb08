//! Integration tests for the scoring workflow + retraining loop.
//!
//! Each test wires the real stack — in-memory libsql store, registry,
//! retraining worker — and exercises the end-to-end contract.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use lead_score::config::ScoringConfig;
use lead_score::lead::{LeadRecord, LeadSource, Outcome};
use lead_score::registry::ModelRegistry;
use lead_score::retraining::{
    RetrainOutcome, RetrainingManager, RetrainingState, spawn_retrain_worker,
};
use lead_score::store::{LibSqlStore, Store};
use lead_score::workflow::ScoringWorkflow;

/// Maximum time to wait for a background retraining attempt to land.
const RETRAIN_WAIT: Duration = Duration::from_secs(10);

fn hot_lead(id: &str, outcome: Outcome) -> LeadRecord {
    LeadRecord {
        lead_id: id.into(),
        age: 38,
        location: "San Diego".into(),
        industry: "Technology".into(),
        email_opens: 26,
        website_visits: 17,
        content_downloads: 8,
        days_since_contact: 1,
        lead_source: LeadSource::Referral,
        outcome,
    }
}

fn cold_lead(id: &str, outcome: Outcome) -> LeadRecord {
    LeadRecord {
        lead_id: id.into(),
        age: 52,
        location: "Omaha".into(),
        industry: "Agriculture".into(),
        email_opens: 1,
        website_visits: 0,
        content_downloads: 0,
        days_since_contact: 48,
        lead_source: LeadSource::ColdCall,
        outcome,
    }
}

fn bootstrap_corpus() -> Vec<(LeadRecord, bool)> {
    (0..20)
        .map(|i| {
            if i % 2 == 0 {
                (hot_lead(&format!("SEED-{i}"), Outcome::Unknown), true)
            } else {
                (cold_lead(&format!("SEED-{i}"), Outcome::Unknown), false)
            }
        })
        .collect()
}

struct Stack {
    workflow: ScoringWorkflow,
    manager: Arc<RetrainingManager>,
    registry: Arc<ModelRegistry>,
    store: Arc<dyn Store>,
}

/// Wire the full stack with a live retraining worker and a bootstrapped
/// version 1.0.
async fn stack(config: ScoringConfig) -> Stack {
    let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let registry = Arc::new(ModelRegistry::new(store.clone()));
    let manager = Arc::new(RetrainingManager::new(
        store.clone(),
        registry.clone(),
        config.clone(),
        Arc::new(RetrainingState::new()),
    ));
    manager.train_initial(&bootstrap_corpus()).await.unwrap();

    let (handle, _worker) = spawn_retrain_worker(manager.clone());
    let workflow = ScoringWorkflow::new(store.clone(), registry.clone(), handle, config);

    Stack {
        workflow,
        manager,
        registry,
        store,
    }
}

#[tokio::test]
async fn scoring_round_trip_with_feedback_accumulation() {
    let stack = stack(ScoringConfig::default()).await;

    // Unknown outcome: scored, nothing counted as feedback.
    let response = stack
        .workflow
        .score(hot_lead("L1", Outcome::Unknown))
        .await
        .unwrap();
    assert_eq!(response.lead_id, "L1");
    assert_eq!(response.model_version, "1.0");
    assert!((0.0..=1.0).contains(&response.conversion_score));
    assert_eq!(stack.store.feedback_count().await.unwrap(), 0);

    // Re-submitting the same identifier with a verified outcome increments
    // the count by exactly one — it is the same lead, upserted in place.
    stack
        .workflow
        .score(hot_lead("L1", Outcome::Converted))
        .await
        .unwrap();
    assert_eq!(stack.store.feedback_count().await.unwrap(), 1);
    assert_eq!(stack.store.scored_count().await.unwrap(), 1);

    // A hot lead should rank well above a cold one under the bootstrap model.
    let cold = stack
        .workflow
        .score(cold_lead("L2", Outcome::Unknown))
        .await
        .unwrap();
    assert!(response.conversion_score > cold.conversion_score);
}

#[tokio::test]
async fn reaching_threshold_triggers_one_background_attempt() {
    let config = ScoringConfig {
        retraining_threshold: 12,
        ..Default::default()
    };
    let stack = stack(config).await;

    // Eleven labeled leads: below threshold, nothing may fire.
    for i in 0..11 {
        let record = if i % 2 == 0 {
            hot_lead(&format!("L{i}"), Outcome::Converted)
        } else {
            cold_lead(&format!("L{i}"), Outcome::Lost)
        };
        stack.workflow.score(record).await.unwrap();
    }
    let status = stack.manager.status().await.unwrap();
    assert_eq!(status.feedback_count, 11);
    assert!(status.last_retrain_time.is_none());

    // The twelfth labeled lead crosses the threshold and hands off to the
    // background worker; scoring returns immediately.
    stack
        .workflow
        .score(cold_lead("L11", Outcome::Lost))
        .await
        .unwrap();

    // The attempt is observable via last_retrain_time updating.
    timeout(RETRAIN_WAIT, async {
        loop {
            let status = stack.manager.status().await.unwrap();
            if status.last_retrain_time.is_some() && !status.is_retraining {
                break;
            }
            sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("background retraining attempt never completed");

    // The challenger cannot beat a near-perfect champion by the improvement
    // threshold on the same separable distribution, so the champion stays.
    assert_eq!(stack.registry.get_active().await.unwrap().version, "1.0");

    // Scoring keeps working after the attempt.
    let response = stack
        .workflow
        .score(hot_lead("L-after", Outcome::Unknown))
        .await
        .unwrap();
    assert_eq!(response.model_version, "1.0");
}

#[tokio::test]
async fn unlabeled_submissions_never_trigger_retraining() {
    let config = ScoringConfig {
        retraining_threshold: 3,
        ..Default::default()
    };
    let stack = stack(config).await;

    for i in 0..10 {
        stack
            .workflow
            .score(hot_lead(&format!("L{i}"), Outcome::Unknown))
            .await
            .unwrap();
    }

    let status = stack.manager.status().await.unwrap();
    assert_eq!(status.feedback_count, 0);
    assert!(status.last_check_time.is_none());
    assert!(status.last_retrain_time.is_none());
}

#[tokio::test]
async fn manual_retrain_runs_synchronously_at_threshold() {
    let config = ScoringConfig {
        // High enough that the automatic path stays quiet in this test.
        retraining_threshold: 100,
        ..Default::default()
    };
    let stack = stack(config).await;

    for i in 0..14 {
        let record = if i % 2 == 0 {
            hot_lead(&format!("L{i}"), Outcome::Converted)
        } else {
            cold_lead(&format!("L{i}"), Outcome::Lost)
        };
        stack.workflow.score(record).await.unwrap();
    }

    // Below the configured threshold the manual path fails fast with the
    // deficit, and no attempt is recorded.
    let err = stack.manager.retrain_now().await.unwrap_err();
    assert!(err.to_string().contains("86 more required"));
    assert!(
        stack
            .manager
            .status()
            .await
            .unwrap()
            .last_retrain_time
            .is_none()
    );

    // With a permissive threshold the same corpus trains synchronously.
    let permissive = ScoringConfig {
        retraining_threshold: 10,
        ..Default::default()
    };
    let manager = RetrainingManager::new(
        stack.store.clone(),
        stack.registry.clone(),
        permissive,
        Arc::new(RetrainingState::new()),
    );
    let outcome = manager.retrain_now().await.unwrap();
    assert!(matches!(
        outcome,
        RetrainOutcome::Promoted { .. } | RetrainOutcome::NoImprovement { .. }
    ));
    assert!(
        manager
            .status()
            .await
            .unwrap()
            .last_retrain_time
            .is_some()
    );
}
