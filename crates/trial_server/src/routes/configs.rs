//! Configuration lifecycle endpoints
//!
//! Create, edit, generate, activate and inspect randomisation designs, plus
//! the side-effect-free preview tool.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use trial_core::preview::PreviewReport;
use trial_core::types::{ConfigId, NewConfig, RandomisationConfig, TrialId};
use trial_store::model::{GenerationSummary, ListStats};
use trial_store::patch::ConfigPatch;
use trial_store::RandomisationStore;

use super::{ApiResponse, AppState};
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, CallerIdentity};

/// Single configuration payload
#[derive(Debug, Clone, Serialize)]
pub struct ConfigPayload {
    pub config: Option<RandomisationConfig>,
}

/// Configuration history payload
#[derive(Debug, Clone, Serialize)]
pub struct ConfigListPayload {
    pub configs: Vec<RandomisationConfig>,
}

/// List generation payload
#[derive(Debug, Clone, Serialize)]
pub struct SummaryPayload {
    pub summary: GenerationSummary,
}

/// List statistics payload
#[derive(Debug, Clone, Serialize)]
pub struct StatsPayload {
    pub stats: ListStats,
}

/// Preview payload
#[derive(Debug, Clone, Serialize)]
pub struct PreviewPayload {
    pub preview: PreviewReport,
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn config_body(config: RandomisationConfig) -> Json<ApiResponse<ConfigPayload>> {
    Json(ApiResponse::ok(ConfigPayload {
        config: Some(config),
    }))
}

/// Build the configuration routes
pub fn routes<S: RandomisationStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/api/v1/configs", post(create_config::<S>))
        .route("/api/v1/configs/test", post(test_config::<S>))
        .route(
            "/api/v1/configs/{id}",
            get(get_config::<S>).put(update_config::<S>),
        )
        .route("/api/v1/configs/{id}/generate", post(generate_list::<S>))
        .route("/api/v1/configs/{id}/activate", post(activate_config::<S>))
        .route("/api/v1/configs/{id}/stats", get(list_stats::<S>))
        .route("/api/v1/trials/{trial_id}/configs", get(trial_configs::<S>))
        .route(
            "/api/v1/trials/{trial_id}/configs/active",
            get(active_config::<S>),
        )
}

/// POST /api/v1/configs - Save a draft design
async fn create_config<S: RandomisationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(caller): CallerIdentity,
    ApiJson(new): ApiJson<NewConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state.service.save_config(&caller, new).await?;
    Ok((StatusCode::CREATED, config_body(config)))
}

/// GET /api/v1/configs/{id}
async fn get_config<S: RandomisationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(_caller): CallerIdentity,
    ApiPath(id): ApiPath<ConfigId>,
) -> ApiResult<ConfigPayload> {
    let config = state.service.get_config(id).await?;
    Ok(config_body(config))
}

/// PUT /api/v1/configs/{id} - Field-mask update of an unlocked design
async fn update_config<S: RandomisationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(caller): CallerIdentity,
    ApiPath(id): ApiPath<ConfigId>,
    ApiJson(patch): ApiJson<ConfigPatch>,
) -> ApiResult<ConfigPayload> {
    let config = state.service.update_config(&caller, id, patch).await?;
    Ok(config_body(config))
}

/// POST /api/v1/configs/{id}/generate
async fn generate_list<S: RandomisationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(caller): CallerIdentity,
    ApiPath(id): ApiPath<ConfigId>,
) -> ApiResult<SummaryPayload> {
    let summary = state.service.generate_list(&caller, id).await?;
    Ok(Json(ApiResponse::ok(SummaryPayload { summary })))
}

/// POST /api/v1/configs/{id}/activate
async fn activate_config<S: RandomisationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(caller): CallerIdentity,
    ApiPath(id): ApiPath<ConfigId>,
) -> ApiResult<ConfigPayload> {
    let config = state.service.activate_config(&caller, id).await?;
    Ok(config_body(config))
}

/// GET /api/v1/configs/{id}/stats
async fn list_stats<S: RandomisationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(caller): CallerIdentity,
    ApiPath(id): ApiPath<ConfigId>,
) -> ApiResult<StatsPayload> {
    let stats = state.service.list_stats(&caller, id).await?;
    Ok(Json(ApiResponse::ok(StatsPayload { stats })))
}

/// POST /api/v1/configs/test - Preview a design without persisting anything
async fn test_config<S: RandomisationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(_caller): CallerIdentity,
    ApiJson(candidate): ApiJson<NewConfig>,
) -> ApiResult<PreviewPayload> {
    let preview = state.service.test_config(&candidate)?;
    Ok(Json(ApiResponse::ok(PreviewPayload { preview })))
}

/// GET /api/v1/trials/{trial_id}/configs - Design history, newest first
async fn trial_configs<S: RandomisationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(_caller): CallerIdentity,
    ApiPath(trial): ApiPath<TrialId>,
) -> ApiResult<ConfigListPayload> {
    let configs = state.service.configs_for_trial(trial).await?;
    Ok(Json(ApiResponse::ok(ConfigListPayload { configs })))
}

/// GET /api/v1/trials/{trial_id}/configs/active
async fn active_config<S: RandomisationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(_caller): CallerIdentity,
    ApiPath(trial): ApiPath<TrialId>,
) -> ApiResult<ConfigPayload> {
    let config = state.service.active_config(trial).await?;
    Ok(Json(ApiResponse::ok(ConfigPayload { config })))
}
