//! Request span middleware.
//!
//! Every request runs inside an `api_request` span. When the handler
//! finishes, the status and latency are recorded on the span and a
//! `request-completed` event is logged (at `warn` for 5xx).

use axum::{body::Body, http::Request, response::Response};
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{field::Empty, info, info_span, warn, Instrument, Span};

use super::ResponseFuture;

#[derive(Clone, Default)]
pub struct TracingLayer;

impl TracingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService { inner }
    }
}

#[derive(Clone)]
pub struct TracingService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for TracingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let route = route_of(req.uri().path());

        let span = info_span!(
            "api_request",
            http.method = %req.method(),
            http.route = route,
            http.status_code = Empty,
            latency_ms = Empty,
        );

        Box::pin(
            async move {
                let started = Instant::now();
                let result = inner.call(req).await;
                let latency_ms = started.elapsed().as_millis() as u64;

                let span = Span::current();
                span.record("latency_ms", latency_ms);
                if let Ok(response) = &result {
                    let code = response.status().as_u16();
                    span.record("http.status_code", code);
                    if response.status().is_server_error() {
                        warn!(status = "request-completed", http.status_code = code, latency_ms);
                    } else {
                        info!(status = "request-completed", http.status_code = code, latency_ms);
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

/// Route template for a path, so NHS numbers stay out of span fields.
fn route_of(path: &str) -> &'static str {
    if path.starts_with("/pds-retrieval/") {
        "/pds-retrieval/:nhs_number"
    } else if path == "/health" {
        "/health"
    } else {
        "unmatched"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::convert::Infallible;
    use tower::{service_fn, ServiceExt};

    #[test]
    fn test_route_hides_nhs_number() {
        assert_eq!(route_of("/pds-retrieval/9442964410"), "/pds-retrieval/:nhs_number");
        assert_eq!(route_of("/health"), "/health");
        assert_eq!(route_of("/favicon.ico"), "unmatched");
    }

    #[tokio::test]
    async fn test_passes_response_through() {
        let inner = service_fn(|_req: Request<Body>| async {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            Ok::<_, Infallible>(response)
        });

        let response = TracingLayer::new()
            .layer(inner)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
