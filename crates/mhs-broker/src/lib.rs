//! # MHS Broker - STOMP Transport
//!
//! Connection lifecycle, transactional publication and subscriptions against
//! the message broker that fronts the MHS.
//!
//! ```text
//! ┌───────────────────┐  connect()   ┌───────────┐  Connector   ┌──────────────┐
//! │ ConnectionManager │ ───────────▶ │ failover  │ ───────────▶ │ STOMP / TCP  │
//! │                   │              │ (1 retry) │              │ or in-memory │
//! └───────────────────┘              └───────────┘              └──────────────┘
//!          │ events()
//!          ▼
//!   Connecting / Connected / Error
//! ```
//!
//! Publishing is always transactional: frames of one `publish` are delivered
//! together and in call order, or not at all.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

use std::time::Duration;

pub mod codec;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod failover;
pub mod frame;
pub mod memory;
pub mod publisher;
pub mod stomp;

// Re-export main types
pub use codec::StompCodec;
pub use connection::{BrokerConnection, Connection, Connector, Delivery, Subscription};
pub use endpoint::BrokerEndpoint;
pub use error::{BrokerError, ConnectionError, PublishError};
pub use failover::{ConnectionEvent, ConnectionManager, FailoverPolicy};
pub use frame::{AckMode, Command, Frame};
pub use memory::InMemoryBroker;
pub use publisher::{publish, BrokerPublisher, MessagePublisher, OutboundError};
pub use stomp::{StompConnection, StompConnector, StompOptions};

/// Protocol version negotiated on `CONNECT`.
pub const STOMP_VERSION: &str = "1.2";

/// Deliveries buffered per subscription.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Reconnects after the first failed attempt.
pub const DEFAULT_MAX_RECONNECTS: u32 = 1;

/// Pause before a reconnect.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(100);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version() {
        assert_eq!(STOMP_VERSION, "1.2");
    }

    #[test]
    fn test_failover_defaults() {
        assert_eq!(DEFAULT_MAX_RECONNECTS, 1);
        assert_eq!(DEFAULT_RECONNECT_DELAY, Duration::from_millis(100));
    }
}
