//! Tower layer that authenticates requests by bearer token.
//!
//! A request with a valid access token reaches the inner service with its
//! [`Claims`] and [`AuthenticatedSubject`] in the request extensions. Any
//! failure answers `401` with the same body, whatever the cause.

use crate::error::ValidationError;
use crate::jwt::{extract_bearer, Claims, JwtValidator};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::debug;

/// Subject of the validated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject(pub String);

/// Authentication layer for Tower
#[derive(Clone)]
pub struct AuthLayer {
    validator: Arc<JwtValidator>,
}

impl AuthLayer {
    /// Creates a layer validating with `validator`.
    pub fn new(validator: Arc<JwtValidator>) -> Self {
        Self { validator }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            validator: Arc::clone(&self.validator),
        }
    }
}

/// Authentication service wrapper
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    validator: Arc<JwtValidator>,
}

impl<S, B> Service<Request<B>> for AuthService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        let validator = Arc::clone(&self.validator);
        // Keep the service that was polled ready for this call.
        let ready = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, ready);
        let token = bearer_token(&request).map(str::to_owned);

        Box::pin(async move {
            let claims = match token {
                Ok(token) => validator.validate(&token).await,
                Err(e) => Err(e),
            };
            match claims {
                Ok(claims) => {
                    let extensions = request.extensions_mut();
                    extensions.insert(AuthenticatedSubject(claims.sub.clone()));
                    extensions.insert(claims);
                    inner.call(request).await
                }
                Err(e) => {
                    debug!(code = e.code(), error = %e, "Request not authenticated");
                    Ok(unauthenticated(&e))
                }
            }
        })
    }
}

fn bearer_token<B>(request: &Request<B>) -> Result<&str, ValidationError> {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ValidationError::malformed("missing Authorization header"))?;
    let value = value
        .to_str()
        .map_err(|_| ValidationError::malformed("Authorization header is not text"))?;
    extract_bearer(value)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

fn unauthenticated(err: &ValidationError) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(ErrorBody {
            error: err.public_message(),
        }),
    )
        .into_response()
}
