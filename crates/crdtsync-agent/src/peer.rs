//! Sources of peer state.

use crate::reconcile::SyncFailure;
use crate::registry::Registry;
use async_trait::async_trait;
use crdtsync_proto::{Encoding, RouteScheme, StateEnvelope};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Something that can hand over a peer's state for one instance.
#[async_trait]
pub trait PeerSource: Send + Sync {
    /// Human-readable peer name, used in logs and progress records.
    fn name(&self) -> &str;

    /// Fetch the peer's current state for `instance`.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncFailure`] if the peer is unreachable, has no such
    /// instance, or sends a payload that fails to decode.
    async fn fetch(&self, instance: &str) -> Result<StateEnvelope, SyncFailure>;
}

/// A peer reached over HTTP.
pub struct HttpPeer {
    client: Client,
    base_url: Url,
    routes: RouteScheme,
    name: String,
}

impl HttpPeer {
    /// Create a client for the peer at `base_url`.
    ///
    /// Route paths are absolute, so any path on `base_url` is ignored.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(base_url: Url, routes: RouteScheme, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let name = base_url.as_str().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            routes,
            name,
        })
    }

    /// URL of the peer's exported state of `instance`.
    ///
    /// # Errors
    ///
    /// Returns error if the route cannot be joined onto the base URL.
    pub fn state_url(&self, instance: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(&self.routes.state(instance))
    }

    fn unreachable(&self, reason: impl ToString) -> SyncFailure {
        SyncFailure::Unreachable {
            peer: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl PeerSource for HttpPeer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, instance: &str) -> Result<StateEnvelope, SyncFailure> {
        let url = self.state_url(instance).map_err(|e| self.unreachable(e))?;

        tracing::debug!(peer = %self.name, instance, %url, "GET peer state");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/cbor, application/json")
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        if !response.status().is_success() {
            return Err(SyncFailure::Status {
                peer: self.name.clone(),
                status: response.status().as_u16(),
            });
        }

        let encoding = Encoding::from_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
        );
        let body = response.bytes().await.map_err(|e| self.unreachable(e))?;

        let envelope =
            StateEnvelope::decode(&body, encoding).map_err(|e| SyncFailure::Decode {
                peer: self.name.clone(),
                reason: e.to_string(),
            })?;

        if envelope.instance != instance {
            return Err(SyncFailure::Decode {
                peer: self.name.clone(),
                reason: format!("asked for '{instance}', got '{}'", envelope.instance),
            });
        }
        Ok(envelope)
    }
}

/// A peer living in the same process, reached through its [`Registry`].
///
/// Envelopes still pass through the JSON codec, so decoding and validation
/// behave as on the wire. The peer can be taken offline to simulate a
/// partition.
#[derive(Clone)]
pub struct InMemoryPeer {
    name: String,
    registry: Arc<Registry>,
    online: Arc<AtomicBool>,
}

impl InMemoryPeer {
    /// Wrap a registry as a peer.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            name: registry.replica_id().to_string(),
            registry,
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Take the peer on- or offline.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Check if the peer answers fetches.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerSource for InMemoryPeer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, instance: &str) -> Result<StateEnvelope, SyncFailure> {
        if !self.is_online() {
            return Err(SyncFailure::Unreachable {
                peer: self.name.clone(),
                reason: "peer is offline".to_string(),
            });
        }

        let envelope = self
            .registry
            .envelope(instance)
            .await
            .ok_or_else(|| SyncFailure::Status {
                peer: self.name.clone(),
                status: 404,
            })?;

        let decode_failure = |e: crdtsync_proto::MessageError| SyncFailure::Decode {
            peer: self.name.clone(),
            reason: e.to_string(),
        };
        let bytes = envelope.to_json().map_err(decode_failure)?;
        StateEnvelope::from_json(&bytes).map_err(decode_failure)
    }
}
