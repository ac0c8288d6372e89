//! Health check and readiness endpoints
//!
//! `/health` answers as long as the process serves requests; `/ready` also
//! opens and rolls back a store transaction, so load balancers stop routing
//! to an instance whose database is unreachable.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use trial_store::{RandomisationStore, StoreTransaction};

use super::AppState;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("healthy")
    pub status: String,
    /// Server version
    pub version: String,
    /// Server uptime in seconds
    pub uptime_secs: u64,
    /// Deployment environment
    pub environment: String,
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    /// Ready status
    pub ready: bool,
    /// Storage backend name
    pub backend: String,
    /// Reason the store is unusable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Build the health routes
pub fn routes<S: RandomisationStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/health", get(health_handler::<S>))
        .route("/ready", get(ready_handler::<S>))
}

/// GET /health - Health check endpoint
async fn health_handler<S: RandomisationStore>(State(state): State<AppState<S>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: crate::VERSION.to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        environment: state.config.environment.to_string(),
    };

    (StatusCode::OK, Json(response))
}

/// GET /ready - Readiness probe
async fn ready_handler<S: RandomisationStore>(State(state): State<AppState<S>>) -> impl IntoResponse {
    let store = state.service.store();
    let backend = store.backend_name().to_string();

    let probe = match store.begin().await {
        Ok(tx) => tx.rollback().await,
        Err(err) => Err(err),
    };

    match probe {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                backend,
                error: None,
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, backend = %backend, "Readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    ready: false,
                    backend,
                    error: Some(err.to_string()),
                }),
            )
        }
    }
}
