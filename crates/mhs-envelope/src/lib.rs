//! # MHS Envelope - ebXML Envelope Parsing
//!
//! Turns namespace-prefixed ebXML/SOAP envelopes into a navigable tree and
//! resolves the routing keys (interaction and conversation identifiers) the
//! gateway dispatches on.
//!
//! ## Tree Shape
//!
//! ```text
//! <SOAP:Envelope>                         { "Envelope": {
//!   <SOAP:Header>                             "Header": {
//!     <eb:MessageHeader eb:version="2.0">       "MessageHeader": {
//!       <eb:Action>RCMR_IN030000UK06</eb:Action>  "version": "2.0",
//!     </eb:MessageHeader>                         "Action": "RCMR_IN030000UK06" } } } }
//!   </SOAP:Header>
//! </SOAP:Envelope>
//! ```
//!
//! - Namespace prefixes are stripped from every element and attribute name.
//! - Attributes are merged into the element node.
//! - Element text lives under [`INNER_TEXT`]; a text-only element collapses
//!   to a plain text node.
//! - Repeated sibling elements become a [`Node::List`].

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod ebxml;
pub mod node;
pub mod parser;
pub mod search;

// Re-export main types
pub use ebxml::{
    extract_conversation_id, extract_interaction_id, interactions, InboundMessage,
    ACTION_SEARCH_DEPTH,
};
pub use node::{Element, Node};
pub use parser::{ParseError, ParsedEnvelope};

/// Reserved key holding element text content.
pub const INNER_TEXT: &str = "innerText";

/// Search depth used by [`ParsedEnvelope::find`].
pub const DEFAULT_SEARCH_DEPTH: usize = 10;
