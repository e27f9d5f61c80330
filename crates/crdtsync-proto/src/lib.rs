//! # crdtsync protocol
//!
//! Wire envelopes and the HTTP route scheme for state exchange.
//!
//! ## Messages
//!
//! - `StateEnvelope`: a full CRDT snapshot of one named instance
//! - `CharacterEdit`: a single sequence character for live editing
//!
//! Both encode as JSON or CBOR and are validated on decode; a payload that
//! fails validation is rejected as a whole.
//!
//! ## Routes
//!
//! Route scheme: `/{prefix}/v1/{instance}/{endpoint}`, with the instance
//! name percent-encoded.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;
pub mod routes;

pub use messages::{CharacterEdit, Encoding, MessageError, StateEnvelope};
pub use routes::{is_routable, RouteScheme};
