//! HTTP route scheme for state exchange.
//!
//! Route structure: `/{prefix}/v1/{instance}/{endpoint}`
//!
//! This allows:
//! - Versioned evolution of the protocol
//! - Per-instance addressing, so instances reconcile independently
//!
//! Instance names are percent-encoded into a single path segment. The dot
//! segments `.` and `..` are not routable and are rejected as names.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

/// Protocol version for the route scheme.
pub const PROTOCOL_VERSION: &str = "v1";

/// Characters escaped in the instance segment.
const INSTANCE_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'\\');

/// Check whether `instance` can be addressed as a path segment.
#[must_use]
pub fn is_routable(instance: &str) -> bool {
    !matches!(instance, "" | "." | "..")
}

/// Percent-encode an instance name into one path segment.
#[must_use]
pub fn encode_instance(instance: &str) -> String {
    utf8_percent_encode(instance, INSTANCE_ESCAPE).to_string()
}

/// Decode a path segment produced by [`encode_instance`].
///
/// Returns `None` for invalid UTF-8 or a non-routable name.
#[must_use]
pub fn decode_instance(segment: &str) -> Option<String> {
    let instance = percent_decode_str(segment).decode_utf8().ok()?;
    is_routable(&instance).then(|| instance.into_owned())
}

/// Route scheme configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteScheme {
    /// Route prefix (default: "crdtsync")
    pub prefix: String,
}

impl Default for RouteScheme {
    fn default() -> Self {
        Self::new("crdtsync")
    }
}

impl RouteScheme {
    /// Create a new route scheme with the given prefix.
    ///
    /// Leading and trailing slashes are ignored.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    fn base(&self, instance: &str) -> String {
        format!(
            "/{}/{}/{}",
            self.prefix,
            PROTOCOL_VERSION,
            encode_instance(instance)
        )
    }

    /// Path of a peer's exported state (GET).
    #[must_use]
    pub fn state(&self, instance: &str) -> String {
        format!("{}/state", self.base(instance))
    }

    /// Path accepting a pushed envelope (POST).
    #[must_use]
    pub fn push(&self, instance: &str) -> String {
        format!("{}/push", self.base(instance))
    }

    /// Path of the live sequence editing channel.
    #[must_use]
    pub fn edits(&self, instance: &str) -> String {
        format!("{}/edits", self.base(instance))
    }

    /// Path for an endpoint.
    #[must_use]
    pub fn path(&self, instance: &str, endpoint: Endpoint) -> String {
        match endpoint {
            Endpoint::State => self.state(instance),
            Endpoint::Push => self.push(instance),
            Endpoint::Edits => self.edits(instance),
        }
    }

    /// Parse a path to extract components.
    ///
    /// Returns `(instance, endpoint)` if valid, with the instance name
    /// decoded.
    #[must_use]
    pub fn parse(&self, path: &str) -> Option<(String, Endpoint)> {
        let expected_prefix = format!("/{}/{}/", self.prefix, PROTOCOL_VERSION);
        let remainder = path.strip_prefix(&expected_prefix)?;

        let (segment, endpoint) = remainder.split_once('/')?;
        let instance = decode_instance(segment)?;

        let endpoint = match endpoint {
            "state" => Endpoint::State,
            "push" => Endpoint::Push,
            "edits" => Endpoint::Edits,
            _ => return None,
        };

        Some((instance, endpoint))
    }
}

/// Endpoints of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Full state export
    State,
    /// Pushed envelope
    Push,
    /// Live sequence edits
    Edits,
}
