//! Middleware stack for the gateway.
//!
//! Layer order: Request → Tracing → Timeout → Auth (PDS routes only) → Handler

use axum::response::Response;
use std::future::Future;
use std::pin::Pin;

pub mod auth;
pub mod timeout;
pub mod tracing;

pub use auth::{constant_time_compare, AuthLayer};
pub use timeout::TimeoutLayer;
pub use tracing::TracingLayer;

/// Future returned by every gateway middleware service.
pub type ResponseFuture<E> = Pin<Box<dyn Future<Output = Result<Response, E>> + Send>>;
