//! HTTP surface: key-set discovery, refresh exchange, logout, health and
//! metrics.

use crate::error::TokenError;
use crate::issuer::{Issuer, TokenPair};
use crate::jwks::{Jwks, JwksPublisher};
use crate::metrics;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Where the public key set is served.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Token issuer
    pub issuer: Arc<Issuer>,
    /// Key-set view over the issuer's key manager
    pub publisher: JwksPublisher,
}

impl AppState {
    /// State publishing the keys `issuer` signs with.
    pub fn new(issuer: Arc<Issuer>) -> Self {
        let publisher = JwksPublisher::new(Arc::clone(issuer.key_manager()));
        AppState { issuer, publisher }
    }
}

/// Routes for the key set, refresh, logout, health and metrics.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(JWKS_PATH, get(jwks))
        .route("/api/v1/token/refresh", post(refresh))
        .route("/api/v1/logout", post(logout))
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .with_state(state)
}

/// Body of refresh and logout requests.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    /// The presented refresh token
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    code: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    active_kid: String,
}

async fn jwks(State(state): State<AppState>) -> Json<Jwks> {
    Json(state.publisher.get_jwks())
}

async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, TokenError> {
    let pair = state.issuer.refresh(&request.refresh_token).await?;
    Ok(Json(pair))
}

async fn logout(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<StatusCode, TokenError> {
    state.issuer.revoke(&request.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        active_kid: state.publisher.current_key_id(),
    })
}

async fn metrics_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        // Credential failures share one external message; the code tells
        // operators which check failed.
        let (status, error) = if self.is_retryable() {
            (StatusCode::SERVICE_UNAVAILABLE, "temporarily unavailable")
        } else if self.is_unauthenticated() {
            (StatusCode::UNAUTHORIZED, "unauthenticated")
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        };

        if status != StatusCode::UNAUTHORIZED {
            warn!(code = self.code(), error = %self, "Request failed");
        }

        (
            status,
            Json(ErrorBody {
                error,
                code: self.code(),
            }),
        )
            .into_response()
    }
}
