//! Route modules for the randomisation server
//!
//! This module contains endpoint group-specific routers:
//! - configs: configuration lifecycle, list generation, statistics, preview
//! - randomise: subject randomisation
//! - health: Health check and readiness endpoints

pub mod configs;
pub mod health;
pub mod randomise;

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use trial_store::{RandomisationService, RandomisationStore};

use crate::config::ServerConfig;

/// Application state shared across all handlers
pub struct AppState<S> {
    /// Randomisation engine
    pub service: RandomisationService<S>,
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Server start time for uptime calculation
    pub start_time: std::time::Instant,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
        }
    }
}

impl<S: RandomisationStore> AppState<S> {
    /// Create a new AppState
    pub fn new(service: RandomisationService<S>, config: Arc<ServerConfig>) -> Self {
        Self {
            service,
            config,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Success envelope, payload fields flattened next to `success`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Always true
    pub success: bool,
    #[serde(flatten)]
    pub payload: T,
}

impl<T> ApiResponse<T> {
    /// Wrap a payload
    pub fn ok(payload: T) -> Self {
        Self {
            success: true,
            payload,
        }
    }
}

/// Issues a v4 UUID for requests arriving without `x-request-id`
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestUuid;

impl MakeRequestId for RequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

fn request_span(request: &Request<Body>) -> tracing::Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
    )
}

/// Build the main application router by merging all route modules
pub fn build_router<S: RandomisationStore>(
    service: RandomisationService<S>,
    config: Arc<ServerConfig>,
) -> Router {
    let state = AppState::new(service, config);

    Router::new()
        .merge(health::routes())
        .merge(configs::routes())
        .merge(randomise::routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(RequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(request_span))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tower::ServiceExt;
    use trial_store::memory::MemoryStore;

    fn router() -> Router {
        build_router(
            RandomisationService::new(MemoryStore::new()),
            Arc::new(ServerConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_build_router_creates_valid_router() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_request_id_is_issued_and_propagated() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let issued = response.headers().get("x-request-id").unwrap();
        assert_eq!(issued.to_str().unwrap().len(), 36);

        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "req-42");
    }

    #[tokio::test]
    async fn test_unknown_route_returns_404() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_envelope_flattens_payload() {
        #[derive(Serialize)]
        struct Payload {
            config: u32,
        }

        let json = serde_json::to_value(ApiResponse::ok(Payload { config: 7 })).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "config": 7}));
    }
}
