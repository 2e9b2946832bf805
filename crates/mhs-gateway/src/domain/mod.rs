//! Domain types for the MHS gateway.
//!
//! Configuration, correlation identifiers, errors and the pending-reply store.

pub mod config;
pub mod correlation;
pub mod error;
pub mod pending;

// Re-exports for convenience
pub use config::{
    AuthConfig, BrokerConfig, ConfigError, FailoverConfig, GatewayConfig, HttpConfig,
    IdentityConfig, TimeoutConfig,
};
pub use correlation::CorrelationId;
pub use error::{ApiError, ApiResult, FieldError, GatewayError};
pub use pending::{
    cleanup_task, MhsReply, PendingRequestStore, PendingStats, RegistrationGuard, StatsSnapshot,
};
