//! Protocol messages for state exchange.

use crdtsync_core::{Character, CrdtKind, ReplicaId, Snapshot};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Payload encodings understood by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// JSON, mirroring the state shape field for field
    Json,
    /// CBOR, the compact form used for persistence
    Cbor,
}

impl Encoding {
    /// HTTP content type of the encoding.
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            Encoding::Json => "application/json",
            Encoding::Cbor => "application/cbor",
        }
    }

    /// Pick an encoding from a content type header, defaulting to JSON.
    #[must_use]
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.starts_with("application/cbor") => Encoding::Cbor,
            _ => Encoding::Json,
        }
    }

    /// Pick an encoding from a file extension (`.cbor` or `.json`).
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "cbor" => Some(Encoding::Cbor),
            "json" => Some(Encoding::Json),
            _ => None,
        }
    }

    /// Guess the encoding of a payload from its first byte.
    ///
    /// JSON envelopes are objects and start with `{` (after optional
    /// whitespace); anything else is treated as CBOR.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Self {
        match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => Encoding::Json,
            _ => Encoding::Cbor,
        }
    }
}

/// A full snapshot of one CRDT instance, as exchanged between replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEnvelope {
    /// Name of the CRDT instance
    pub instance: String,
    /// Replica that exported the snapshot
    pub origin: ReplicaId,
    /// Full CRDT state
    pub snapshot: Snapshot,
}

impl StateEnvelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(instance: impl Into<String>, origin: ReplicaId, snapshot: Snapshot) -> Self {
        Self {
            instance: instance.into(),
            origin,
            snapshot,
        }
    }

    /// Kind of the enclosed snapshot.
    #[must_use]
    pub fn kind(&self) -> CrdtKind {
        self.snapshot.kind()
    }

    /// Check the envelope and its snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Invalid`] on the first violation.
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.instance.is_empty() {
            return Err(MessageError::Invalid("empty instance name".to_string()));
        }
        if self.origin.is_empty() {
            return Err(MessageError::Invalid("empty origin replica".to_string()));
        }
        self.snapshot
            .validate()
            .map_err(|e| MessageError::Invalid(e.to_string()))
    }

    /// Serialize with the given encoding.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn encode(&self, encoding: Encoding) -> Result<Vec<u8>, MessageError> {
        encode(self, encoding)
    }

    /// Deserialize and validate.
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be decoded or fails validation.
    pub fn decode(bytes: &[u8], encoding: Encoding) -> Result<Self, MessageError> {
        let envelope: Self = decode(bytes, encoding)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, MessageError> {
        self.encode(Encoding::Cbor)
    }

    /// Deserialize and validate from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization or validation fails.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, MessageError> {
        Self::decode(bytes, Encoding::Cbor)
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, MessageError> {
        self.encode(Encoding::Json)
    }

    /// Deserialize and validate from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization or validation fails.
    pub fn from_json(bytes: &[u8]) -> Result<Self, MessageError> {
        Self::decode(bytes, Encoding::Json)
    }
}

/// One sequence character sent over a live editing channel.
///
/// Inserts and deletes travel the same way: a delete is a character whose
/// `deleted` flag is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterEdit {
    /// Name of the sequence instance
    pub instance: String,
    /// Replica that produced the edit
    pub origin: ReplicaId,
    /// The inserted or tombstoned character
    pub character: Character,
}

impl CharacterEdit {
    /// Create a new edit message.
    #[must_use]
    pub fn new(instance: impl Into<String>, origin: ReplicaId, character: Character) -> Self {
        Self {
            instance: instance.into(),
            origin,
            character,
        }
    }

    /// Serialize with the given encoding.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn encode(&self, encoding: Encoding) -> Result<Vec<u8>, MessageError> {
        encode(self, encoding)
    }

    /// Deserialize and validate.
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be decoded or the character id
    /// is malformed.
    pub fn decode(bytes: &[u8], encoding: Encoding) -> Result<Self, MessageError> {
        let edit: Self = decode(bytes, encoding)?;
        if edit.instance.is_empty() {
            return Err(MessageError::Invalid("empty instance name".to_string()));
        }
        let id = &edit.character.id;
        if id.site.is_empty() || id.counter == 0 {
            return Err(MessageError::Invalid(format!("malformed character id {id}")));
        }
        Ok(edit)
    }
}

fn encode<T: Serialize>(value: &T, encoding: Encoding) -> Result<Vec<u8>, MessageError> {
    match encoding {
        Encoding::Json => {
            serde_json::to_vec(value).map_err(|e| MessageError::Serialize(e.to_string()))
        }
        Encoding::Cbor => {
            let mut bytes = Vec::new();
            ciborium::into_writer(value, &mut bytes)
                .map_err(|e| MessageError::Serialize(e.to_string()))?;
            Ok(bytes)
        }
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8], encoding: Encoding) -> Result<T, MessageError> {
    match encoding {
        Encoding::Json => {
            serde_json::from_slice(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
        }
        Encoding::Cbor => {
            ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
        }
    }
}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
    /// Payload decoded but violates an invariant
    #[error("invalid message: {0}")]
    Invalid(String),
}
