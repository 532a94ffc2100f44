//! HTTP surface tests driving the router in-process.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use token_service::config::{IssuerPolicy, KeyPolicy};
use token_service::http::{router, AppState, JWKS_PATH};
use token_service::storage::{InMemoryKeyStore, InMemoryRevocationStore};
use token_service::{Issuer, KeyManager};
use tower::ServiceExt;

async fn test_issuer() -> Arc<Issuer> {
    let keys = KeyManager::initialize(Arc::new(InMemoryKeyStore::new()), KeyPolicy::default())
        .await
        .unwrap();
    Arc::new(Issuer::new(
        Arc::new(keys),
        Arc::new(InMemoryRevocationStore::new()),
        IssuerPolicy::default(),
    ))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_jwks_endpoint_lists_active_key() {
    let issuer = test_issuer().await;
    let active = issuer.key_manager().active_key_id();
    let app = router(AppState::new(issuer));

    let response = app
        .oneshot(Request::builder().uri(JWKS_PATH).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let keys = body["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kid"], active);
    assert_eq!(keys[0]["use"], "sig");
    assert_eq!(keys[0]["alg"], "RS256");
    assert!(keys[0].get("d").is_none());
}

#[tokio::test]
async fn test_jwks_endpoint_reflects_rotation() {
    let issuer = test_issuer().await;
    let app = router(AppState::new(Arc::clone(&issuer)));

    let new_kid = issuer.key_manager().rotate().await.unwrap();

    let response = app
        .oneshot(Request::builder().uri(JWKS_PATH).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    let keys = body["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0]["kid"], new_kid);
}

#[tokio::test]
async fn test_refresh_endpoint_exchanges_token() {
    let issuer = test_issuer().await;
    let pair = issuer.issue_pair("user-1").await.unwrap();
    let app = router(AppState::new(issuer));

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/token/refresh",
            json!({ "refresh_token": pair.refresh_token }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);
    assert!(body["access_token"].as_str().is_some());

    // Replay of the consumed token.
    let response = app
        .oneshot(post_json(
            "/api/v1/token/refresh",
            json!({ "refresh_token": pair.refresh_token }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "unauthenticated");
    assert_eq!(body["code"], "TOKEN_REFRESH_REVOKED");
}

#[tokio::test]
async fn test_logout_then_refresh_rejected() {
    let issuer = test_issuer().await;
    let pair = issuer.issue_pair("user-1").await.unwrap();
    let app = router(AppState::new(issuer));

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/logout",
            json!({ "refresh_token": pair.refresh_token }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(post_json(
            "/api/v1/token/refresh",
            json!({ "refresh_token": pair.refresh_token }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_garbage_refresh_token_rejected() {
    let app = router(AppState::new(test_issuer().await));

    let response = app
        .oneshot(post_json(
            "/api/v1/token/refresh",
            json!({ "refresh_token": "not.a.jwt" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "TOKEN_REFRESH_INVALID");
}

#[tokio::test]
async fn test_health_and_metrics() {
    let issuer = test_issuer().await;
    let active = issuer.key_manager().active_key_id();
    let app = router(AppState::new(issuer));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_kid"], active);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
