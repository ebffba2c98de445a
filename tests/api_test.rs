//! HTTP surface: status codes, error bodies and headers.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::Harness;
use fieldsync::api::{ErrorBody, build_router};
use fieldsync::model::*;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn setup() -> (Router, WorkOrderId, String, Harness) {
    let h = Harness::new();
    let (id, asg) = h.job(&["Ana"]).await;
    let router = build_router(std::sync::Arc::clone(&h.sync));
    (router, id, asg[0].token.as_str().to_string(), h)
}

fn post(uri: String, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let (router, _, _, _h) = setup().await;
    let response = router
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn job_requires_a_bearer_token() {
    let (router, id, _, _h) = setup().await;
    let response = router
        .oneshot(
            Request::get(format!("/api/jobs/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: ErrorBody = json_body(response).await;
    assert_eq!(body.error, "unauthorized");
}

#[tokio::test]
async fn token_for_another_job_is_forbidden() {
    let (router, _, token, h) = setup().await;
    let (other, _) = h.job(&["Ben"]).await;
    let response = router
        .oneshot(
            Request::get(format!("/api/jobs/{other}"))
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn job_read_carries_its_version_as_etag() {
    let (router, id, token, _h) = setup().await;
    let response = router
        .oneshot(
            Request::get(format!("/api/jobs/{id}"))
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let etag = response.headers()[header::ETAG].to_str().unwrap().to_string();
    let snapshot: JobSnapshot = json_body(response).await;
    assert_eq!(etag, format!("\"{}\"", snapshot.version));
    assert_eq!(snapshot.assignment.unwrap().mechanic_name, "Ana");
}

#[tokio::test]
async fn illegal_timer_action_is_unprocessable() {
    let (router, id, token, _h) = setup().await;
    let response = router
        .oneshot(post(
            format!("/api/jobs/{id}/timer"),
            &token,
            json!({ "action": "pause", "reason": "lunch" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: ErrorBody = json_body(response).await;
    assert_eq!(body.error, "invalid_transition");
    assert_eq!(body.from.as_deref(), Some("idle"));
    assert_eq!(body.action.as_deref(), Some("pause"));
}

#[tokio::test]
async fn parts_routes_add_and_clear() {
    let (router, id, token, _h) = setup().await;

    let response = router
        .clone()
        .oneshot(post(
            format!("/api/jobs/{id}/parts/add"),
            &token,
            json!({ "partId": "OIL-5W30", "qty": 6, "rate_cents": 899 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let added: MutationResponse = json_body(response).await;
    assert_eq!(added.ack, Ack::Parts(AdjustOutcome::kept(6)));

    let response = router
        .oneshot(post(
            format!("/api/jobs/{id}/parts/remove"),
            &token,
            json!({ "product_id": "OIL-5W30", "clear": true }),
        ))
        .await
        .unwrap();
    let removed: MutationResponse = json_body(response).await;
    assert_eq!(removed.ack, Ack::Parts(AdjustOutcome::removed()));
    assert_eq!(removed.version, added.version + 1);
}

#[tokio::test]
async fn stale_if_match_returns_current_state() {
    let (router, id, token, _h) = setup().await;

    let response = router
        .clone()
        .oneshot(post(
            format!("/api/jobs/{id}/parts/add"),
            &token,
            json!({ "product_id": "OIL-5W30" }),
        ))
        .await
        .unwrap();
    let added: MutationResponse = json_body(response).await;

    let mut request = post(
        format!("/api/jobs/{id}/details"),
        &token,
        json!({ "cause": "leaking gasket" }),
    );
    request.headers_mut().insert(
        header::IF_MATCH,
        format!("\"{}\"", added.version - 1).parse().unwrap(),
    );
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: ErrorBody = json_body(response).await;
    let current = body.current.unwrap();
    assert_eq!(current.version, added.version);
    assert_eq!(current.line_items[0].qty, 1);
}

#[tokio::test]
async fn idempotency_key_replays_the_first_answer() {
    let (router, id, token, _h) = setup().await;
    let send = || {
        let mut request = post(
            format!("/api/jobs/{id}/parts/add"),
            &token,
            json!({ "product_id": "WIPER-22", "qty": 2 }),
        );
        request
            .headers_mut()
            .insert("idempotency-key", "k-123".parse().unwrap());
        request
    };

    let first: MutationResponse =
        json_body(router.clone().oneshot(send()).await.unwrap()).await;
    let second: MutationResponse = json_body(router.oneshot(send()).await.unwrap()).await;
    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(second.ack, Ack::Parts(AdjustOutcome::kept(2)));
}

#[tokio::test]
async fn invalid_inspection_lists_every_issue() {
    let (router, id, token, _h) = setup().await;
    let response = router
        .oneshot(post(
            format!("/api/jobs/{id}/pm_inspection/submit"),
            &token,
            json!({
                "checklist": [{
                    "id": "lights",
                    "items": [
                        { "id": "lt-1", "status": "fail" },
                        { "id": "lt-2" }
                    ]
                }],
                "inspector_name": "Ana"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: ErrorBody = json_body(response).await;
    assert_eq!(body.error, "validation");
    let targets: Vec<&str> = body.issues.iter().map(|i| i.target.as_str()).collect();
    assert_eq!(targets, vec!["lt-1", "lt-2"]);
}

#[tokio::test]
async fn bad_if_match_is_a_validation_error() {
    let (router, id, token, _h) = setup().await;
    let mut request = post(
        format!("/api/jobs/{id}/status"),
        &token,
        json!({ "status": "in_progress" }),
    );
    request
        .headers_mut()
        .insert(header::IF_MATCH, "yesterday".parse().unwrap());
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
