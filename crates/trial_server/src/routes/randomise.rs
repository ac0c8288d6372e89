//! Subject randomisation endpoint

use axum::{extract::State, response::Json, routing::post, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trial_core::types::{SubjectId, TrialId};
use trial_store::model::{RandomisationOutcome, RandomiseRequest};
use trial_store::RandomisationStore;

use super::{ApiResponse, AppState};
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, CallerIdentity};

/// Randomise request body; the trial comes from the path
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RandomiseBody {
    /// Subject to allocate
    pub subject_id: SubjectId,
    /// Covariates for stratified designs
    #[serde(default)]
    pub stratum_values: BTreeMap<String, String>,
}

/// Randomisation payload
#[derive(Debug, Clone, Serialize)]
pub struct OutcomePayload {
    pub result: RandomisationOutcome,
}

/// Build the randomisation routes
pub fn routes<S: RandomisationStore>() -> Router<AppState<S>> {
    Router::new().route(
        "/api/v1/trials/{trial_id}/randomize",
        post(randomise_subject::<S>),
    )
}

/// POST /api/v1/trials/{trial_id}/randomize
async fn randomise_subject<S: RandomisationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(caller): CallerIdentity,
    ApiPath(trial_id): ApiPath<TrialId>,
    ApiJson(body): ApiJson<RandomiseBody>,
) -> Result<Json<ApiResponse<OutcomePayload>>, ApiError> {
    let request = RandomiseRequest {
        trial_id,
        subject_id: body.subject_id,
        stratum_values: body.stratum_values,
    };
    let result = state.service.randomise_subject(&caller, request).await?;
    Ok(Json(ApiResponse::ok(OutcomePayload { result })))
}
