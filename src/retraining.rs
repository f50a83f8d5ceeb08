//! Retraining manager — guarded challenger/champion protocol.
//!
//! The scoring path never trains. When enough verified outcomes accumulate,
//! the workflow's LEARN step enqueues a signal to the retraining worker; the
//! worker fits a challenger on all labeled history and promotes it only on a
//! clear AUC gain. A single atomic guard keeps runs mutually exclusive — a
//! trigger while one is in flight is a no-op, not a queue entry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::ScoringConfig;
use crate::error::{Error, RetrainingError};
use crate::lead::LeadRecord;
use crate::model;
use crate::registry::ModelRegistry;
use crate::store::Store;

/// Process-wide retraining state: the mutual-exclusion guard plus attempt
/// timestamps. Injectable rather than a module-level global.
///
/// Deliberately carries no feedback counter — the persisted labeled-row count
/// is authoritative and is re-read whenever it is needed.
#[derive(Debug, Default)]
pub struct RetrainingState {
    is_retraining: AtomicBool,
    last_check_time: RwLock<Option<DateTime<Utc>>>,
    last_retrain_time: RwLock<Option<DateTime<Utc>>>,
}

impl RetrainingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the guard. Returns false when a run is already in flight.
    pub fn try_acquire(&self) -> bool {
        self.is_retraining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the guard. Must be called on every exit path of a run.
    pub fn release(&self) {
        self.is_retraining.store(false, Ordering::Release);
    }

    /// Whether a retraining run is currently in flight.
    pub fn is_retraining(&self) -> bool {
        self.is_retraining.load(Ordering::Acquire)
    }

    async fn mark_checked(&self) {
        *self.last_check_time.write().await = Some(Utc::now());
    }

    async fn mark_retrained(&self) {
        *self.last_retrain_time.write().await = Some(Utc::now());
    }

    pub async fn last_check_time(&self) -> Option<DateTime<Utc>> {
        *self.last_check_time.read().await
    }

    pub async fn last_retrain_time(&self) -> Option<DateTime<Utc>> {
        *self.last_retrain_time.read().await
    }
}

/// Result of a completed retraining attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetrainOutcome {
    /// The challenger won and is now active.
    Promoted {
        old_version: String,
        new_version: String,
        old_auc: f64,
        new_auc: f64,
        feedback_count: u64,
    },
    /// The challenger was discarded; the champion stays active.
    NoImprovement {
        version: String,
        champion_auc: f64,
        challenger_auc: f64,
        feedback_count: u64,
    },
    /// Another run held the guard; nothing happened.
    AlreadyRunning,
}

/// Observability snapshot of the retraining subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct RetrainingStatus {
    pub is_retraining: bool,
    pub feedback_count: u64,
    pub retraining_threshold: u64,
    pub ready_for_retraining: bool,
    pub last_check_time: Option<DateTime<Utc>>,
    pub last_retrain_time: Option<DateTime<Utc>>,
}

/// Promotion law: the challenger must beat the champion by at least the
/// configured absolute AUC gain.
pub fn should_promote(champion_auc: f64, challenger_auc: f64, improvement_threshold: f64) -> bool {
    challenger_auc >= champion_auc + improvement_threshold
}

/// Owns the challenger/champion protocol. Shared between the scoring
/// workflow (via the worker) and the manual retrain path.
pub struct RetrainingManager {
    store: Arc<dyn Store>,
    registry: Arc<ModelRegistry>,
    config: ScoringConfig,
    state: Arc<RetrainingState>,
}

impl RetrainingManager {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<ModelRegistry>,
        config: ScoringConfig,
        state: Arc<RetrainingState>,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            state,
        }
    }

    pub fn state(&self) -> &Arc<RetrainingState> {
        &self.state
    }

    /// Automatic retraining entry point, invoked by the worker on a LEARN
    /// signal. A run already in flight makes this a no-op.
    pub async fn maybe_retrain(&self) -> Result<RetrainOutcome, Error> {
        if !self.state.try_acquire() {
            debug!("Retraining already in progress, skipping trigger");
            return Ok(RetrainOutcome::AlreadyRunning);
        }

        let result = self.run_attempt().await;
        // The guard is released on every exit path, including failures, so
        // future triggers can retry.
        self.state.release();
        result
    }

    /// Manual, synchronous retraining. Follows the identical protocol but
    /// fails fast below the feedback threshold and surfaces an in-flight run
    /// as an error instead of a silent no-op.
    pub async fn retrain_now(&self) -> Result<RetrainOutcome, Error> {
        let have = self.store.feedback_count().await?;
        let need = self.config.retraining_threshold;
        if have < need {
            return Err(RetrainingError::InsufficientFeedback { have, need }.into());
        }

        if !self.state.try_acquire() {
            return Err(RetrainingError::ConcurrentRetraining.into());
        }

        let result = self.run_attempt().await;
        self.state.release();
        result
    }

    /// One guarded attempt: fit a challenger on all labeled history, compare
    /// against the champion, promote on a clear win. The caller holds the
    /// guard.
    async fn run_attempt(&self) -> Result<RetrainOutcome, Error> {
        self.state.mark_checked().await;

        let champion = self.registry.get_active().await?;
        let corpus = self.store.labeled_records().await?;
        let feedback_count = corpus.len() as u64;

        info!(
            samples = feedback_count,
            champion = %champion.version,
            champion_auc = champion.metrics.auc,
            "Retraining triggered"
        );

        let challenger = model::train_candidate(&corpus, self.config.train_split)
            .map_err(|e| {
                error!(error = %e, "Challenger training failed, keeping champion");
                e
            })?;

        let outcome = if should_promote(
            champion.metrics.auc,
            challenger.metrics.auc,
            self.config.improvement_threshold,
        ) {
            let new_version = self.registry.register(&challenger).await?;
            self.registry.activate(&new_version).await?;

            info!(
                old_version = %champion.version,
                new_version = %new_version,
                old_auc = champion.metrics.auc,
                new_auc = challenger.metrics.auc,
                "Challenger promoted"
            );
            RetrainOutcome::Promoted {
                old_version: champion.version.clone(),
                new_version,
                old_auc: champion.metrics.auc,
                new_auc: challenger.metrics.auc,
                feedback_count,
            }
        } else {
            info!(
                champion = %champion.version,
                champion_auc = champion.metrics.auc,
                challenger_auc = challenger.metrics.auc,
                improvement_threshold = self.config.improvement_threshold,
                "Challenger below improvement threshold, discarded"
            );
            RetrainOutcome::NoImprovement {
                version: champion.version.clone(),
                champion_auc: champion.metrics.auc,
                challenger_auc: challenger.metrics.auc,
                feedback_count,
            }
        };

        // The attempt ran to completion (with or without promotion) — that is
        // what distinguishes "attempted, no gain" from "never attempted".
        self.state.mark_retrained().await;
        Ok(outcome)
    }

    /// Initial bootstrap: train on a supplied labeled corpus and activate the
    /// result. Only sensible while the registry is empty.
    pub async fn train_initial(&self, corpus: &[(LeadRecord, bool)]) -> Result<String, Error> {
        let candidate = model::train_candidate(corpus, self.config.train_split)?;
        let version = self.registry.register(&candidate).await?;
        self.registry.activate(&version).await?;
        info!(
            version = %version,
            samples = corpus.len(),
            auc = candidate.metrics.auc,
            "Bootstrap model trained"
        );
        Ok(version)
    }

    /// Current retraining status, with the feedback count read fresh from
    /// persistence.
    pub async fn status(&self) -> Result<RetrainingStatus, Error> {
        let feedback_count = self.store.feedback_count().await?;
        Ok(RetrainingStatus {
            is_retraining: self.state.is_retraining(),
            feedback_count,
            retraining_threshold: self.config.retraining_threshold,
            ready_for_retraining: feedback_count >= self.config.retraining_threshold,
            last_check_time: self.state.last_check_time().await,
            last_retrain_time: self.state.last_retrain_time().await,
        })
    }
}

/// Handle used by the workflow's LEARN step to request background retraining
/// without blocking on it.
#[derive(Clone)]
pub struct RetrainHandle {
    tx: mpsc::Sender<()>,
    state: Arc<RetrainingState>,
}

impl RetrainHandle {
    pub(crate) fn new(tx: mpsc::Sender<()>, state: Arc<RetrainingState>) -> Self {
        Self { tx, state }
    }

    /// Request a background run. Returns false when a run is already in
    /// flight or queued — the signal is dropped, not queued behind it.
    pub fn request(&self) -> bool {
        if self.state.is_retraining() {
            return false;
        }
        self.tx.try_send(()).is_ok()
    }

    /// A handle with no worker behind it; every request is dropped.
    /// Useful as a synchronous stub in tests.
    pub fn detached(state: Arc<RetrainingState>) -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx, state }
    }
}

/// Spawn the background retraining worker.
///
/// LEARN signals land on a bounded channel; the worker coalesces duplicates
/// and runs one guarded attempt per signal. Failures are logged and never
/// reach the scoring path.
pub fn spawn_retrain_worker(manager: Arc<RetrainingManager>) -> (RetrainHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(1);
    let handle_state = manager.state().clone();

    let worker = tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // Coalesce signals that piled up while we were idle.
            while rx.try_recv().is_ok() {}

            match manager.maybe_retrain().await {
                Ok(RetrainOutcome::Promoted {
                    old_version,
                    new_version,
                    ..
                }) => {
                    info!(%old_version, %new_version, "Background retraining promoted a new model");
                }
                Ok(RetrainOutcome::NoImprovement { version, .. }) => {
                    info!(%version, "Background retraining kept the champion");
                }
                Ok(RetrainOutcome::AlreadyRunning) => {
                    debug!("Background retraining skipped: run already in flight");
                }
                Err(e) => {
                    error!(error = %e, "Background retraining failed; champion unchanged");
                }
            }
        }
    });

    (RetrainHandle::new(tx, handle_state), worker)
}
