//! REST surface — thin axum layer over the scoring core.
//!
//! The core emits abstract error kinds; this module owns the mapping to HTTP
//! status codes and the wire error shape.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::error::{Error, RetrainingError};
use crate::features::{CATEGORICAL_FEATURES, NUMERIC_FEATURES};
use crate::lead::{FieldError, LeadRecord};
use crate::model::ModelMetrics;
use crate::registry::ModelRegistry;
use crate::retraining::{RetrainingManager, RetrainingStatus};
use crate::store::Store;
use crate::workflow::ScoringWorkflow;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<ScoringWorkflow>,
    pub registry: Arc<ModelRegistry>,
    pub retraining: Arc<RetrainingManager>,
    pub store: Arc<dyn Store>,
    pub started_at: Instant,
}

/// Wire shape for errors: abstract kind, message, optional field details.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_details: Option<Vec<FieldError>>,
}

/// Core error → HTTP status and wire body.
fn classify(error: &Error) -> (StatusCode, ErrorBody) {
    let (status, kind, field_details) = match error {
        Error::Validation(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_error",
            Some(e.fields.clone()),
        ),
        Error::Encoding(_) => (StatusCode::INTERNAL_SERVER_ERROR, "encoding_error", None),
        Error::Registry(crate::error::RegistryError::NoActiveModel) => {
            (StatusCode::SERVICE_UNAVAILABLE, "no_active_model", None)
        }
        Error::Registry(_) => (StatusCode::INTERNAL_SERVER_ERROR, "registry_error", None),
        Error::Retraining(RetrainingError::InsufficientFeedback { .. }) => {
            (StatusCode::BAD_REQUEST, "insufficient_feedback", None)
        }
        Error::Retraining(RetrainingError::ConcurrentRetraining) => {
            (StatusCode::CONFLICT, "concurrent_retraining", None)
        }
        Error::Retraining(RetrainingError::TrainingFailure(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "training_failure", None)
        }
        Error::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None),
        Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None),
    };

    (
        status,
        ErrorBody {
            kind,
            message: error.to_string(),
            field_details,
        },
    )
}

/// Response wrapper so handlers can use `?` on core errors.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = classify(&self.0);
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database_connected: bool,
    model_available: bool,
    uptime_seconds: f64,
    timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    model_version: String,
    model_metrics: ModelMetrics,
    total_leads_scored: u64,
    feedback_samples_collected: u64,
    last_training_timestamp: chrono::DateTime<Utc>,
    features_used: Vec<&'static str>,
    retraining: RetrainingStatus,
}

/// POST /api/score
async fn score(
    State(state): State<AppState>,
    Json(record): Json<LeadRecord>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.workflow.score(record).await?;
    Ok(Json(response))
}

/// GET /api/health
///
/// Degrades (503) when the registry has no active model — the system must
/// not pretend it can score.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database_connected = state.store.scored_count().await.is_ok();
    let model_available = state.registry.has_active().await;
    let healthy = database_connected && model_available;

    let body = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        database_connected,
        model_available,
        uptime_seconds: state.started_at.elapsed().as_secs_f64(),
        timestamp: Utc::now(),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// GET /api/info
async fn info(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let active = state.registry.get_active().await?;
    let total_leads_scored = state.store.scored_count().await.map_err(Error::from)?;
    let retraining = state.retraining.status().await?;

    let body = InfoResponse {
        model_version: active.version.clone(),
        model_metrics: active.metrics.clone(),
        total_leads_scored,
        feedback_samples_collected: retraining.feedback_count,
        last_training_timestamp: active.trained_at,
        features_used: NUMERIC_FEATURES
            .iter()
            .chain(CATEGORICAL_FEATURES.iter())
            .copied()
            .collect(),
        retraining,
    };
    Ok(Json(body))
}

/// POST /api/retrain
///
/// Manual, synchronous retraining — may legitimately block the caller for
/// the duration of the run.
async fn retrain(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.retraining.retrain_now().await?;
    Ok(Json(outcome))
}

/// GET /api/retrain/status
async fn retrain_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let status = state.retraining.status().await?;
    Ok(Json(status))
}

/// Build the full route tree.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/score", post(score))
        .route("/api/health", get(health))
        .route("/api/info", get(info))
        .route("/api/retrain", post(retrain))
        .route("/api/retrain/status", get(retrain_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RegistryError, ValidationError};

    #[test]
    fn validation_errors_carry_field_details() {
        let error = Error::Validation(ValidationError {
            fields: vec![FieldError {
                field: "age".into(),
                message: "must be between 18 and 100".into(),
            }],
        });
        let (status, body) = classify(&error);
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.kind, "validation_error");
        let details = body.field_details.unwrap();
        assert_eq!(details[0].field, "age");
    }

    #[test]
    fn empty_registry_maps_to_service_unavailable() {
        let (status, body) = classify(&Error::Registry(RegistryError::NoActiveModel));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.kind, "no_active_model");
    }

    #[test]
    fn retraining_error_mapping() {
        let (status, body) = classify(&Error::Retraining(
            RetrainingError::InsufficientFeedback { have: 10, need: 50 },
        ));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.kind, "insufficient_feedback");
        assert!(body.message.contains("40 more required"));

        let (status, body) =
            classify(&Error::Retraining(RetrainingError::ConcurrentRetraining));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.kind, "concurrent_retraining");

        let (status, _) = classify(&Error::Retraining(RetrainingError::TrainingFailure(
            "fit diverged".into(),
        )));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
