//! Authorization middleware.
//!
//! The raw `Authorization` header value must equal one of the configured
//! keys. A missing header is a 401, an unrecognised value a 403.

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::warn;

use super::ResponseFuture;
use crate::domain::{ApiError, AuthConfig};

pub const MISSING_HEADER: &str = "Authorization header not provided";
pub const INVALID_KEY: &str = "Authorization header value is not a valid authorization key";

/// Authorization layer
#[derive(Clone)]
pub struct AuthLayer {
    config: Arc<AuthConfig>,
}

impl AuthLayer {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// Authorization service
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    config: Arc<AuthConfig>,
}

impl<S> Service<Request<Body>> for AuthService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Error>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let config = Arc::clone(&self.config);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if let Err(err) = authorize(&req, &config) {
                warn!(
                    status = "authorization-failed",
                    error = %err,
                    "Request rejected"
                );
                return Ok(err.into_response());
            }
            inner.call(req).await
        })
    }
}

fn authorize<B>(req: &Request<B>, config: &AuthConfig) -> Result<(), ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| ApiError::Unauthorized(MISSING_HEADER.to_string()))?;

    // Non-ASCII values cannot match a configured key
    let value = header
        .to_str()
        .map_err(|_| ApiError::Forbidden(INVALID_KEY.to_string()))?;

    // Compare against every key
    let matched = config
        .keys
        .iter()
        .fold(false, |found, key| constant_time_compare(value, key) | found);

    if matched {
        Ok(())
    } else {
        Err(ApiError::Forbidden(INVALID_KEY.to_string()))
    }
}

/// Constant-time string comparison.
///
/// Both inputs are padded to the longer length with different fill bytes,
/// and the lengths are compared separately, so neither content nor length
/// short-circuits.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;

    let max_len = std::cmp::max(a.len(), b.len());

    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];

    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);

    (lengths_equal & contents_equal).into()
}
