//! REST API Tests
//!
//! Drive the full router against a memory store through
//! `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use trial_core::types::{GroupClassId, GroupId, SubjectId, TrialId};
use trial_server::config::ServerConfig;
use trial_server::routes::build_router;
use trial_store::memory::MemoryStore;
use trial_store::RandomisationService;

const ADMIN: (&str, &str) = ("1", "administrator");
const INVESTIGATOR: (&str, &str) = ("2", "investigator");
const MONITOR: (&str, &str) = ("3", "monitor");

async fn app(subjects: i64) -> Router {
    let store = MemoryStore::new();
    store
        .register_trial(
            TrialId(1),
            GroupClassId(10),
            &[(GroupId(1), "Placebo"), (GroupId(2), "Active")],
            (1..=subjects).map(|n| SubjectId(100 + n)),
        )
        .await;
    build_router(
        RandomisationService::new(store),
        Arc::new(ServerConfig::default()),
    )
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    caller: Option<(&str, &str)>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((user, role)) = caller {
        builder = builder.header("x-user-id", user).header("x-user-role", role);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn draft(blinding: &str, total_slots: u32) -> Value {
    json!({
        "trialId": 1,
        "name": "Primary allocation",
        "blinding": blinding,
        "groupClassId": 10,
        "designType": "block",
        "blockSize": 4,
        "ratios": {"1": 1, "2": 1},
        "totalSlots": total_slots,
        "seed": "abc"
    })
}

/// Create, generate and activate a design, returning its id
async fn activated(router: &Router, blinding: &str, total_slots: u32) -> i64 {
    let (status, body) = send(router, "POST", "/api/v1/configs", Some(ADMIN), Some(draft(blinding, total_slots))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let id = body["config"]["id"].as_i64().unwrap();

    let (status, _) = send(router, "POST", &format!("/api/v1/configs/{}/generate", id), Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(router, "POST", &format!("/api/v1/configs/{}/activate", id), Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    id
}

fn randomise(subject: i64) -> Value {
    json!({ "subjectId": subject })
}

#[tokio::test]
async fn test_create_returns_draft_without_seed() {
    let router = app(0).await;
    let (status, body) = send(&router, "POST", "/api/v1/configs", Some(ADMIN), Some(draft("double_blind", 8))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    let config = &body["config"];
    assert_eq!(config["designType"], "block");
    assert_eq!(config["isActive"], false);
    assert_eq!(config["isLocked"], false);
    assert!(config.get("seed").is_none());
}

#[tokio::test]
async fn test_generate_and_activate() {
    let router = app(0).await;
    let (_, body) = send(&router, "POST", "/api/v1/configs", Some(ADMIN), Some(draft("open_label", 8))).await;
    let id = body["config"]["id"].as_i64().unwrap();

    let (status, body) = send(&router, "POST", &format!("/api/v1/configs/{}/generate", id), Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["totalEntries"], 8);
    assert_eq!(body["summary"]["discarded"], 0);

    let (status, body) = send(&router, "POST", &format!("/api/v1/configs/{}/activate", id), Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["isActive"], true);
    assert_eq!(body["config"]["isLocked"], true);

    let (status, body) = send(&router, "GET", "/api/v1/trials/1/configs/active", Some(INVESTIGATOR), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["id"], id);

    let (status, body) = send(&router, "GET", "/api/v1/trials/1/configs", Some(INVESTIGATOR), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["configs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_randomise_double_blind_hides_name() {
    let router = app(2).await;
    activated(&router, "double_blind", 8).await;

    let (status, body) = send(&router, "POST", "/api/v1/trials/1/randomize", Some(INVESTIGATOR), Some(randomise(101))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);

    let result = &body["result"];
    assert_eq!(result["groupName"], "[Blinded]");
    assert_eq!(result["blinded"], true);
    assert_eq!(result["sequenceNumber"], 1);
    let group = result["groupId"].as_i64().unwrap();
    assert!(group == 1 || group == 2);
    assert!(result["randomisationCode"].as_str().unwrap().starts_with("RND-"));
}

#[tokio::test]
async fn test_randomise_open_label_returns_name() {
    let router = app(1).await;
    activated(&router, "open_label", 8).await;

    let (status, body) = send(&router, "POST", "/api/v1/trials/1/randomize", Some(INVESTIGATOR), Some(randomise(101))).await;
    assert_eq!(status, StatusCode::OK);
    let name = body["result"]["groupName"].as_str().unwrap();
    assert!(name == "Placebo" || name == "Active");
    assert_eq!(body["result"]["blinded"], false);
}

#[tokio::test]
async fn test_second_randomisation_is_a_conflict() {
    let router = app(1).await;
    activated(&router, "double_blind", 8).await;

    let (status, _) = send(&router, "POST", "/api/v1/trials/1/randomize", Some(ADMIN), Some(randomise(101))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, "POST", "/api/v1/trials/1/randomize", Some(ADMIN), Some(randomise(101))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "state_error");
}

#[tokio::test]
async fn test_exhaustion_has_its_own_code() {
    let router = app(5).await;
    activated(&router, "double_blind", 4).await;

    for subject in 101..=104 {
        let (status, _) = send(&router, "POST", "/api/v1/trials/1/randomize", Some(ADMIN), Some(randomise(subject))).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&router, "POST", "/api/v1/trials/1/randomize", Some(ADMIN), Some(randomise(105))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "list_exhausted");
}

#[tokio::test]
async fn test_no_active_design() {
    let router = app(1).await;

    let (status, body) = send(&router, "GET", "/api/v1/trials/1/configs/active", Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["config"].is_null());

    let (status, body) = send(&router, "POST", "/api/v1/trials/1/randomize", Some(ADMIN), Some(randomise(101))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "state_error");
}

#[tokio::test]
async fn test_validation_error_message_is_verbatim() {
    let router = app(0).await;
    let mut body = draft("double_blind", 8);
    body["ratios"] = json!({"1": 1});

    let (status, body) = send(&router, "POST", "/api/v1/configs", Some(ADMIN), Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(
        body["message"],
        "At least two treatment groups are required (found 1)"
    );
}

#[tokio::test]
async fn test_roles_are_enforced() {
    let router = app(1).await;

    let (status, body) = send(&router, "POST", "/api/v1/configs", Some(INVESTIGATOR), Some(draft("double_blind", 8))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    activated(&router, "double_blind", 8).await;
    let (status, _) = send(&router, "POST", "/api/v1/trials/1/randomize", Some(MONITOR), Some(randomise(101))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_missing_identity_is_unauthenticated() {
    let router = app(0).await;

    let (status, body) = send(&router, "GET", "/api/v1/trials/1/configs", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test]
async fn test_malformed_requests_are_bad_requests() {
    let router = app(0).await;

    let (status, body) = send(&router, "GET", "/api/v1/configs/abc", Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, body) = send(&router, "POST", "/api/v1/configs", Some(ADMIN), Some(json!({"name": 3}))).await;
    assert!(status.is_client_error());
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn test_unknown_config_is_not_found() {
    let router = app(0).await;

    let (status, body) = send(&router, "GET", "/api/v1/configs/999", Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_update_after_lock_is_a_conflict() {
    let router = app(0).await;
    let id = activated(&router, "double_blind", 8).await;

    let (status, body) = send(
        &router,
        "PUT",
        &format!("/api/v1/configs/{}", id),
        Some(ADMIN),
        Some(json!({"name": "Renamed"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "state_error");

    let (_, body) = send(&router, "GET", &format!("/api/v1/configs/{}", id), Some(ADMIN), None).await;
    assert_eq!(body["config"]["name"], "Primary allocation");
}

#[tokio::test]
async fn test_update_draft() {
    let router = app(0).await;
    let (_, body) = send(&router, "POST", "/api/v1/configs", Some(ADMIN), Some(draft("double_blind", 8))).await;
    let id = body["config"]["id"].as_i64().unwrap();

    let (status, body) = send(
        &router,
        "PUT",
        &format!("/api/v1/configs/{}", id),
        Some(ADMIN),
        Some(json!({"totalSlots": 12})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["totalSlots"], 12);
}

#[tokio::test]
async fn test_stats_respect_blinding() {
    let router = app(1).await;
    let id = activated(&router, "double_blind", 8).await;
    send(&router, "POST", "/api/v1/trials/1/randomize", Some(ADMIN), Some(randomise(101))).await;

    let uri = format!("/api/v1/configs/{}/stats", id);
    let (status, body) = send(&router, "GET", &uri, Some(INVESTIGATOR), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["total"], 8);
    assert_eq!(body["stats"]["used"], 1);
    assert_eq!(body["stats"]["remaining"], 7);
    assert!(body["stats"]["strata"][0].get("allocated").is_none());

    let (_, body) = send(&router, "GET", &uri, Some(ADMIN), None).await;
    assert!(body["stats"]["strata"][0]["allocated"].is_array());
}

#[tokio::test]
async fn test_preview_persists_nothing() {
    let router = app(0).await;

    let (status, body) = send(&router, "POST", "/api/v1/configs/test", Some(INVESTIGATOR), Some(draft("double_blind", 500))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let preview = &body["preview"];
    assert_eq!(preview["requestedSlots"], 500);
    assert_eq!(preview["generatedSlots"], 200);
    assert_eq!(preview["truncated"], true);
    assert_ne!(preview["seed"], "abc");

    let (_, body) = send(&router, "GET", "/api/v1/trials/1/configs", Some(ADMIN), None).await;
    assert!(body["configs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_designs_are_rejected_up_front() {
    let router = app(0).await;

    let mut body = draft("double_blind", 10);
    body["ratios"] = json!({"1": u32::MAX, "2": 1});
    let (status, body) = send(&router, "POST", "/api/v1/configs/test", Some(MONITOR), Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "Allocation ratios must sum to at most 1000");

    let mut body = draft("double_blind", 10);
    body["blockSize"] = json!(u32::MAX);
    let (status, body) = send(&router, "POST", "/api/v1/configs", Some(ADMIN), Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
}
